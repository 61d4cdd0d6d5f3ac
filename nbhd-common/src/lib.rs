//! # Neighbourhood Common Library
//!
//! Shared code for the client resilience crates including:
//! - Event types (ResilienceEvent enum) and the EventBus
//! - Configuration loading and validation
//! - Error types
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use config::ResilienceConfig;
pub use error::{Error, Result};
pub use events::{EventBus, ResilienceEvent};
