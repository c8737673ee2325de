//! Session configuration loaded from environment variables.

use std::time::Duration;

use chatsync_shared::constants::DEFAULT_PAGE_SIZE;
use chatsync_shared::protocol::bounded_page_size;
use chatsync_shared::UserId;
use chatsync_store::config::env_parse;
use chatsync_store::StoreConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// UID of the signed-in user.
    /// Env: `CHATSYNC_VIEWER`
    /// Default: `"me"`
    pub viewer: UserId,

    /// Display name denormalized onto optimistic messages.
    /// Env: `CHATSYNC_VIEWER_NAME`
    pub viewer_display_name: Option<String>,

    /// How long a send may stay unacknowledged before it is marked failed.
    /// Env: `CHATSYNC_SEND_TIMEOUT_MS`
    /// Default: 15 s
    pub send_timeout: Duration,

    /// Quiet period before a typing flag is emitted.
    /// Env: `CHATSYNC_TYPING_DEBOUNCE_MS`
    /// Default: 400 ms
    pub typing_debounce: Duration,

    /// Quiet period before a settings change is emitted.
    /// Env: `CHATSYNC_SETTINGS_DEBOUNCE_MS`
    /// Default: 600 ms
    pub settings_debounce: Duration,

    /// History page size, clamped to 1..=100.
    /// Env: `CHATSYNC_PAGE_SIZE`
    /// Default: 30
    pub page_size: u16,

    pub store: StoreConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            viewer: UserId::new("me"),
            viewer_display_name: None,
            send_timeout: Duration::from_millis(15_000),
            typing_debounce: Duration::from_millis(400),
            settings_debounce: Duration::from_millis(600),
            page_size: DEFAULT_PAGE_SIZE,
            store: StoreConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self {
            store: StoreConfig::from_env(),
            ..Self::default()
        };

        if let Ok(uid) = std::env::var("CHATSYNC_VIEWER") {
            if !uid.trim().is_empty() {
                config.viewer = UserId::new(uid.trim());
            }
        }
        config.viewer_display_name = std::env::var("CHATSYNC_VIEWER_NAME").ok();

        if let Some(ms) = env_parse::<u64>("CHATSYNC_SEND_TIMEOUT_MS") {
            config.send_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("CHATSYNC_TYPING_DEBOUNCE_MS") {
            config.typing_debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("CHATSYNC_SETTINGS_DEBOUNCE_MS") {
            config.settings_debounce = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u16>("CHATSYNC_PAGE_SIZE") {
            config.page_size = bounded_page_size(n);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.page_size, 30);
        assert_eq!(config.send_timeout, Duration::from_secs(15));
        assert_eq!(config.store, StoreConfig::default());
    }
}
