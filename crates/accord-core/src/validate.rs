//! Construction-time input validation

use crate::error::{AccordError, AccordResult};

/// Require a non-empty bot token
pub fn token(token: &str) -> AccordResult<()> {
    if token.trim().is_empty() {
        return Err(AccordError::Validation("bot token cannot be empty".into()));
    }
    Ok(())
}

/// Require a positive shard count
pub fn shard_count(count: u16) -> AccordResult<()> {
    if count == 0 {
        return Err(AccordError::Validation("shard count must be positive".into()));
    }
    Ok(())
}

/// Require a non-empty cache key
pub fn cache_key(key: &str) -> AccordResult<()> {
    if key.is_empty() {
        return Err(AccordError::Validation("cache key cannot be empty".into()));
    }
    Ok(())
}
