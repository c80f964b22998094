//! Re-exported types from external crates for convenience.
//!
//! These types appear in this crate's public API and are re-exported here
//! so users don't need to add these dependencies to their `Cargo.toml`.

/// Date and time types for envelope header timestamps.
pub use chrono::{DateTime, Utc};
/// JSON values used for message content and inbound messages.
pub use serde_json::{Map, Value};
/// Endpoint and master URLs.
pub use url::Url;
/// Message identifiers.
pub use uuid::Uuid;
