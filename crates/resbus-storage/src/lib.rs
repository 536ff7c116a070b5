//! resbus-storage: Storage abstraction layer
//!
//! This crate provides the storage abstraction for resbus, including:
//! - Path parsing and command-token detection
//! - ResourceStore/ResourceHandle traits for tree operations
//! - In-memory implementation for testing and single-process use
//! - Redis implementation for production
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               resbus-storage                │
//! ├─────────────────────────────────────────────┤
//! │  path.rs   - URL path splitting/dissection  │
//! │  traits.rs - ResourceStore/ResourceHandle   │
//! │  memory.rs - In-memory implementation       │
//! │  redis.rs  - Redis implementation           │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod path;
pub mod redis;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryResourceStore;
pub use path::{dissect_path, is_command, split_path, PathError};
pub use self::redis::{RedisConfig, RedisResourceStore};
pub use traits::{
    child_name, resource_key, validate_elts, Forward, Hook, ResourceHandle, ResourceStore,
    ROOT_KEY,
};
