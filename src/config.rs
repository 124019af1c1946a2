//! Chat backend configuration.
//!
//! Where the backend lives and how eagerly the client reconnects.
//! All tunables have production defaults; tests shrink the delays.

use std::time::Duration;

/// Default message history page size.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Default base delay between reconnect attempts (grows linearly per attempt).
const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default cap on automatic reconnect attempts after an unclean close.
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default debounce before auto-connecting after an auth change.
const DEFAULT_CONNECT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Chat client configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Backend host (and optional port), e.g. `api.stride.fit` or `localhost:8000`.
    pub host: String,
    /// Use `wss`/`https` instead of `ws`/`http`.
    pub use_tls: bool,
    /// Page size for message history requests.
    pub page_size: u32,
    /// Base reconnect delay; attempt `n` waits `base * n`.
    pub reconnect_base_delay: Duration,
    /// Automatic reconnect attempts allowed after an unclean close.
    pub max_reconnect_attempts: u32,
    /// Debounce applied before auto-connecting on an auth change, so rapid
    /// auth-state flicker does not cause connect storms.
    pub connect_debounce: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8000".to_string(),
            use_tls: false,
            page_size: DEFAULT_PAGE_SIZE,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_debounce: DEFAULT_CONNECT_DEBOUNCE,
        }
    }
}

impl ChatConfig {
    /// Config pointed at the given host with TLS enabled.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            use_tls: true,
            ..Self::default()
        }
    }

    /// WebSocket URL for a user's chat socket.
    ///
    /// The user id is part of the path, not a query parameter.
    pub fn ws_url(&self, user_id: &str) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{}://{}/chat/{}/", scheme, self.host, user_id)
    }

    /// Base URL for the chat REST API, with trailing slash.
    pub fn api_base(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}/api/chat/", scheme, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_embeds_user_in_path() {
        let config = ChatConfig::default();
        assert_eq!(config.ws_url("user-42"), "ws://localhost:8000/chat/user-42/");
    }

    #[test]
    fn test_tls_switches_schemes() {
        let config = ChatConfig::for_host("api.stride.fit");
        assert_eq!(config.ws_url("u1"), "wss://api.stride.fit/chat/u1/");
        assert_eq!(config.api_base(), "https://api.stride.fit/api/chat/");
    }

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.max_reconnect_attempts, 5);
    }
}
