//! resbus-api: the HTTP surface of the resource bus.
//!
//! This crate turns inbound HTTP requests into operations on a
//! `ResourceStore`:
//! - `http` - the request router and resource/command handlers
//! - `hooks` - webhook fanout on mutations
//! - `forward` - transparent reverse proxying for forwarded subtrees
//! - `observability` - structured logging, metrics, health endpoints

pub mod forward;
pub mod hooks;
pub mod http;
pub mod observability;
