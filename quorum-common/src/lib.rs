//! # Quorum Common Library
//!
//! Shared code for the Quorum services including:
//! - Error type used by database and configuration helpers
//! - TOML configuration and root folder resolution
//! - SQLite schema initialization
//! - Publication events (QuorumEvent enum) and the EventBus

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
