//! Memoized glob matching for key lookup
//!
//! Patterns compile to anchored regexes once (via `accord_core::pattern`)
//! and are reused across calls.

use accord_core::pattern::compile_glob;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;

/// A memoizing set of compiled glob patterns
///
/// Lookups for a pattern seen before reuse the compiled matcher instead of
/// recompiling on every call.
#[derive(Debug, Default)]
pub struct PatternSet {
    compiled: Mutex<HashMap<String, Regex>>,
}

impl PatternSet {
    /// Create an empty pattern set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test `key` against `pattern`, compiling and caching on first use
    ///
    /// An invalid pattern matches nothing.
    pub fn matches(&self, pattern: &str, key: &str) -> bool {
        // "*" is by far the most common lookup; skip the regex machinery
        if pattern == "*" {
            return true;
        }

        let mut compiled = self.compiled.lock();
        if let Some(re) = compiled.get(pattern) {
            return re.is_match(key);
        }

        match compile_glob(pattern) {
            Ok(re) => {
                let matched = re.is_match(key);
                compiled.insert(pattern.to_string(), re);
                matched
            }
            Err(e) => {
                tracing::debug!(pattern = %pattern, error = %e, "Invalid cache key pattern");
                false
            }
        }
    }

    /// Number of memoized patterns
    #[must_use]
    pub fn len(&self) -> usize {
        self.compiled.lock().len()
    }

    /// Whether no pattern has been memoized yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compiled.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_any_sequence() {
        let set = PatternSet::new();
        assert!(set.matches("user:*", "user:123"));
        assert!(set.matches("user:*", "user:"));
        assert!(!set.matches("user:*", "guild:123"));
    }

    #[test]
    fn test_question_matches_one_char() {
        let set = PatternSet::new();
        assert!(set.matches("shard:?", "shard:1"));
        assert!(!set.matches("shard:?", "shard:12"));
        assert!(!set.matches("shard:?", "shard:"));
    }

    #[test]
    fn test_patterns_are_anchored() {
        let set = PatternSet::new();
        assert!(!set.matches("user", "user:123"));
        assert!(!set.matches(":123", "user:123"));
        assert!(set.matches("user:123", "user:123"));
    }

    #[test]
    fn test_compilation_is_memoized() {
        let set = PatternSet::new();
        set.matches("user:*", "user:1");
        set.matches("user:*", "user:2");
        set.matches("guild:*", "guild:1");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_bare_star_bypasses_cache() {
        let set = PatternSet::new();
        assert!(set.matches("*", "anything"));
        assert!(set.is_empty());
    }
}
