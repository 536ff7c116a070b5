//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Resource not found.
    #[error("resource not found: {key}")]
    NotFound { key: String },

    /// Resource already exists.
    #[error("resource already exists: {key}")]
    AlreadyExists { key: String },

    /// A path component is a reserved command token or ends with the
    /// lock suffix.
    #[error("path contains illegal name: {name}")]
    InvalidPath { name: String },

    /// Hook not found on this resource.
    #[error("hook not found: {id}")]
    HookNotFound { id: String },

    /// Delete attempted on a resource that still has children.
    #[error("can not delete non-leaf resource: {key}")]
    HasChildren { key: String },

    /// Delete attempted on the root resource.
    #[error("can not delete root resource")]
    RootProtected,

    /// Value operation attempted on a collection.
    #[error("resource is not an item: {key}")]
    NotAnItem { key: String },

    /// Collection operation attempted on an item.
    #[error("can not add to item: {key}")]
    NotACollection { key: String },

    /// Hook payload did not parse as a hook object.
    #[error("invalid hook payload: {message}")]
    InvalidHook { message: String },

    /// Forward payload did not parse as a forward object.
    #[error("invalid forward payload: {message}")]
    InvalidForward { message: String },

    /// Per-resource lock could not be acquired within the timeout.
    #[error("could not acquire lock for {key}")]
    LockFailed { key: String },

    /// Backend I/O failure.
    #[error("backend error: {message}")]
    Backend { message: String },
}

impl From<::redis::RedisError> for StorageError {
    fn from(err: ::redis::RedisError) -> Self {
        StorageError::Backend {
            message: err.to_string(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
