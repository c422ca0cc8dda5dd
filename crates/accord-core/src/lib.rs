//! # accord-core
//!
//! Shared value objects and the error taxonomy used across the accord crates.
//! This crate has zero dependencies on transport or runtime infrastructure.

pub mod error;
pub mod intents;
pub mod pattern;
pub mod snowflake;
pub mod validate;

// Re-export commonly used types at crate root
pub use error::{AccordError, AccordResult};
pub use intents::Intents;
pub use snowflake::{Snowflake, SnowflakeParseError};
