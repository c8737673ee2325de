//! Store tuning loaded from environment variables.
//!
//! Every value has a default so an embedding application can construct a
//! store with zero configuration.

use std::time::Duration;

use chatsync_shared::constants::{
    DEFAULT_DEDUPE_WINDOW_MS, DEFAULT_MAX_TIMELINE_ITEMS, DEFAULT_TYPING_TTL_MS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Messages kept per timeline before the oldest are evicted.
    /// Env: `CHATSYNC_MAX_TIMELINE_ITEMS`
    pub max_timeline_items: usize,

    /// How far apart a server ack and an unmatched pending message may be
    /// and still be paired by sender and content.
    /// Env: `CHATSYNC_DEDUPE_WINDOW_MS`
    pub dedupe_window: Duration,

    /// Lifetime of a typing indicator without a refresh.
    /// Env: `CHATSYNC_TYPING_TTL_MS`
    pub typing_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_timeline_items: DEFAULT_MAX_TIMELINE_ITEMS,
            dedupe_window: Duration::from_millis(DEFAULT_DEDUPE_WINDOW_MS),
            typing_ttl: Duration::from_millis(DEFAULT_TYPING_TTL_MS),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse::<usize>("CHATSYNC_MAX_TIMELINE_ITEMS") {
            config.max_timeline_items = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("CHATSYNC_DEDUPE_WINDOW_MS") {
            config.dedupe_window = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("CHATSYNC_TYPING_TTL_MS") {
            config.typing_ttl = Duration::from_millis(ms);
        }

        config
    }
}

/// Read and parse one variable, warning (not failing) on garbage.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.max_timeline_items, DEFAULT_MAX_TIMELINE_ITEMS);
        assert_eq!(config.typing_ttl, Duration::from_secs(6));
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        std::env::set_var("CHATSYNC_TEST_GARBAGE", "twelve");
        assert_eq!(env_parse::<u64>("CHATSYNC_TEST_GARBAGE"), None);
        std::env::set_var("CHATSYNC_TEST_NUMBER", " 42 ");
        assert_eq!(env_parse::<u64>("CHATSYNC_TEST_NUMBER"), Some(42));
        assert_eq!(env_parse::<u64>("CHATSYNC_TEST_UNSET_VARIABLE"), None);
    }
}
