#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::env;
use std::time::Duration;

use bon::Builder;
use url::Url;

use crate::Result;
use crate::error::Error;

const DEFAULT_MOCK_OPEN_DELAY: Duration = Duration::from_millis(800);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;
const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(3);
const DEFAULT_DUPLICATE_CAPACITY: usize = 10;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_PAGE_URL: &str = "http://localhost/";

/// Environment variable holding the URL of the page hosting the client.
pub const PAGE_URL_VAR: &str = "SOCKET_PAGE_URL";
/// Environment variable enabling simulated connections (`1`, `true` or `yes`).
pub const USE_MOCK_VAR: &str = "SOCKET_USE_MOCK";
/// Environment variable overriding the socket base URL.
pub const BASE_URL_VAR: &str = "SOCKET_BASE_URL";

/// Configuration for WebSocket client behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Delay before a simulated connection reports itself open
    pub mock_open_delay: Duration,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
    /// Window within which a repeated `(type, status)` message is suppressed
    pub duplicate_window: Duration,
    /// Number of `(type, status)` keys remembered for suppression
    pub duplicate_capacity: usize,
    /// Emit [`Diagnostic`](crate::ws::Diagnostic) events for dropped frames and
    /// exhausted reconnects. Off by default.
    pub diagnostics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mock_open_delay: DEFAULT_MOCK_OPEN_DELAY,
            reconnect: ReconnectConfig::default(),
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
            duplicate_capacity: DEFAULT_DUPLICATE_CAPACITY,
            diagnostics: false,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    #[must_use]
    pub fn with_mock_open_delay(mut self, delay: Duration) -> Self {
        self.mock_open_delay = delay;
        self
    }
}

/// Configuration for automatic reconnection behavior.
///
/// The attempt budget lives on [`ConnectionConfig`] since it is chosen per
/// connection; this only shapes the delays.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Backoff before the first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier applied per attempt
    pub multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect number `attempt + 1`, i.e. `initial * multiplier^attempt`
    /// capped at `max_backoff`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.multiplier
            .checked_pow(attempt)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Per-connection input to [`Client::connect`](crate::ws::Client::connect).
///
/// # Example
///
/// ```
/// use resilient_socket::ws::ConnectionConfig;
///
/// let config = ConnectionConfig::builder()
///     .resource_id("abc123")
///     .endpoint("ticket-status")
///     .build();
///
/// assert_eq!(config.max_reconnect_attempts, 5);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Logical resource this stream concerns
    #[builder(into)]
    pub resource_id: String,
    /// Path segment identifying the stream type
    #[builder(into)]
    pub endpoint: String,
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    pub max_reconnect_attempts: u32,
    /// Falls back to [`Environment::use_mock`] when unset
    pub use_mock: Option<bool>,
    /// Falls back to [`Environment::socket_base_url`] when unset
    #[builder(into)]
    pub socket_base_url: Option<String>,
}

/// Inputs normally supplied by the hosting application: where the page lives
/// and the deployment-wide socket switches.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// URL of the page hosting the client; its scheme and host seed socket URLs
    pub page_url: Url,
    pub use_mock: bool,
    pub socket_base_url: Option<String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            page_url: Url::parse(DEFAULT_PAGE_URL).expect("default page url should parse"),
            use_mock: false,
            socket_base_url: None,
        }
    }
}

impl Environment {
    /// Builds an environment for a page served from `page_url`.
    pub fn new(page_url: &str) -> Result<Self> {
        let page_url = Url::parse(page_url)?;
        if page_url.host_str().is_none() {
            return Err(Error::validation(format!("page url {page_url} has no host")));
        }

        Ok(Self {
            page_url,
            use_mock: false,
            socket_base_url: None,
        })
    }

    /// Reads [`PAGE_URL_VAR`], [`USE_MOCK_VAR`] and [`BASE_URL_VAR`].
    pub fn from_env() -> Result<Self> {
        let page_url = env::var(PAGE_URL_VAR).unwrap_or_else(|_| DEFAULT_PAGE_URL.to_owned());
        let use_mock = env::var(USE_MOCK_VAR).is_ok_and(|v| parse_flag(&v));
        let socket_base_url = env::var(BASE_URL_VAR).ok().filter(|v| !v.trim().is_empty());

        Ok(Self::new(&page_url)?
            .with_use_mock(use_mock)
            .with_socket_base_url(socket_base_url))
    }

    #[must_use]
    pub fn with_use_mock(mut self, use_mock: bool) -> Self {
        self.use_mock = use_mock;
        self
    }

    #[must_use]
    pub fn with_socket_base_url(mut self, base: Option<String>) -> Self {
        self.socket_base_url = base;
        self
    }

    /// Whether the page is served over a secure scheme.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.page_url.scheme() == "https"
    }

    /// `host[:port]` of the page.
    #[must_use]
    pub fn host(&self) -> String {
        let host = self.page_url.host_str().unwrap_or_default();
        match self.page_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence() {
        let config = ReconnectConfig::default();
        let delays: Vec<u128> = (0..8).map(|n| config.delay_for(n).as_millis()).collect();

        assert_eq!(
            delays,
            [1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
    }

    #[test]
    fn backoff_respects_max_on_overflow() {
        let config = ReconnectConfig::default();

        assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(30));
        assert_eq!(config.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn default_mock_delay_is_eight_hundred_millis() {
        let config = Config::default();
        assert_eq!(config.mock_open_delay, Duration::from_millis(800));
        assert!(!config.diagnostics);
    }

    #[test]
    fn connection_config_defaults() {
        let config = ConnectionConfig::builder()
            .resource_id("r1")
            .endpoint("/s")
            .build();

        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.use_mock, None);
        assert_eq!(config.socket_base_url, None);
    }

    #[test]
    fn environment_host_includes_port() -> Result<()> {
        let env = Environment::new("https://tickets.example.com:8443/events/1")?;

        assert!(env.is_secure());
        assert_eq!(env.host(), "tickets.example.com:8443");
        Ok(())
    }

    #[test]
    fn environment_rejects_hostless_page() {
        Environment::new("data:text/plain,hello").unwrap_err();
    }

    #[test]
    fn flags_parse_loosely() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(parse_flag("yes"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}
