//! Infrastructure layer for chatsync.
//!
//! Contains the TOML configuration loader and [`InMemoryTransport`], an
//! in-process chat backend implementing the `Transport` port from
//! `chatsync-core`.

pub mod config;
pub mod memory_transport;

pub use memory_transport::{InMemoryTransport, Operation};
