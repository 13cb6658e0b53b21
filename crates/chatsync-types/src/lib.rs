//! Shared domain types for chatsync.
//!
//! This crate contains the value types used across the engine: messages and
//! their sub-values (attachments, keyboards, quotes), the raw wire items the
//! transport delivers, listener events, configuration, and every error
//! taxonomy.
//!
//! No infrastructure dependencies: serde, uuid, chrono and thiserror only.

pub mod attachment;
pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod item;
pub mod keyboard;
pub mod message;
