use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::info;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base of the versioned REST api, e.g. `http://localhost:8080/api/v1`.
    pub api_base_url: String,
    /// Base of the auth endpoints, which live outside `/v1`.
    pub auth_base_url: String,
    pub ws_url: String,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub chat_history_limit: usize,
    pub chat_page_size: usize,
    pub keyring_fallback: bool,
    pub session_file: PathBuf,
    pub log_level: String,
}

/// Bounded exponential backoff used by the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 0 means retry forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay.saturating_mul(1u32 << shift);
        std::cmp::min(delay, self.max_delay)
    }

    /// Full-jitter variant: uniformly between half the base delay and the base delay.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let base = self.base_delay(attempt).as_millis() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        let low = base / 2;
        Duration::from_millis(rand::thread_rng().gen_range(low..=base))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api/v1".to_string(),
            auth_base_url: "http://localhost:8080/api".to_string(),
            ws_url: "ws://localhost:8080/ws".to_string(),
            request_timeout: Duration::from_secs(15),
            reconnect: ReconnectPolicy::default(),
            chat_history_limit: 200,
            chat_page_size: 50,
            keyring_fallback: false,
            session_file: PathBuf::from("data").join("session.json"),
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            api_base_url: env::var("API_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            auth_base_url: env::var("AUTH_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.auth_base_url),
            ws_url: env::var("WS_URL").unwrap_or(defaults.ws_url),
            request_timeout: env::var("REQUEST_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            reconnect: ReconnectPolicy {
                initial_delay: env::var("RECONNECT_INITIAL_DELAY_MS").ok().and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.reconnect.initial_delay),
                max_delay: env::var("RECONNECT_MAX_DELAY_MS").ok().and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.reconnect.max_delay),
                max_attempts: env::var("RECONNECT_MAX_ATTEMPTS").ok().and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.reconnect.max_attempts),
            },
            chat_history_limit: env::var("CHAT_HISTORY_LIMIT").ok().and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.chat_history_limit),
            chat_page_size: env::var("CHAT_PAGE_SIZE").ok().and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.chat_page_size),
            keyring_fallback: env::var("KEYRING_FALLBACK").map(|v| v == "true" || v == "1").unwrap_or(false),
            session_file: env::var("SESSION_FILE").map(PathBuf::from).unwrap_or(defaults.session_file),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        info!("Client configuration loaded:");
        info!("  API base: {}", config.api_base_url);
        info!("  Auth base: {}", config.auth_base_url);
        info!("  Realtime endpoint: {}", config.ws_url);
        config
    }
}
