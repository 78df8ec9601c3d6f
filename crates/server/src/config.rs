// Hub server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Collaborator wiring (store, processor) is injected in
// main — this module covers the core server settings.

use std::net::SocketAddr;

/// Core hub server configuration.
///
/// Constructed via [`HubConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT verification secret for identity-provider tokens.
    pub jwt_secret: String,
    /// Log filter directive (e.g. `info`, `lexhub_server=debug`).
    pub log_filter: String,
    /// Sliding rate-limit window in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Maximum chat messages admitted per connection per window.
    pub rate_limit_max_messages: usize,
    /// Reconnection token lifetime in seconds.
    pub reconnect_token_ttl_secs: u64,
    /// Upper bound on a single message-processor call, in seconds.
    pub processor_timeout_secs: u64,
    /// Phone number handed to clients on a voice escalation.
    pub voice_phone_number: String,
    /// Messages replayed to a client on reconnect.
    pub history_page_size: usize,
    /// Unread notifications delivered on subscribe.
    pub notification_backlog: usize,
}

impl HubConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `LEXHUB_HOST` | `0.0.0.0` |
    /// | `LEXHUB_PORT` | `8080` |
    /// | `LEXHUB_JWT_SECRET` | dev-only placeholder |
    /// | `LEXHUB_LOG_FILTER` | `info` |
    /// | `LEXHUB_RATE_LIMIT_WINDOW_MS` | `60000` |
    /// | `LEXHUB_RATE_LIMIT_MAX_MESSAGES` | `30` |
    /// | `LEXHUB_RECONNECT_TOKEN_TTL_SECS` | `300` |
    /// | `LEXHUB_PROCESSOR_TIMEOUT_SECS` | `30` |
    /// | `LEXHUB_VOICE_PHONE_NUMBER` | `1-844-967-3536` |
    /// | `LEXHUB_HISTORY_PAGE_SIZE` | `20` |
    /// | `LEXHUB_NOTIFICATION_BACKLOG` | `10` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("LEXHUB_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("LEXHUB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("LEXHUB_JWT_SECRET")
            .unwrap_or_else(|_| "lexhub_local_development_jwt_secret_must_be_32_chars".into());

        let log_filter = env("LEXHUB_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let rate_limit_window_ms = parse_or("LEXHUB_RATE_LIMIT_WINDOW_MS", &env, 60_000);
        let rate_limit_max_messages = parse_or("LEXHUB_RATE_LIMIT_MAX_MESSAGES", &env, 30);
        let reconnect_token_ttl_secs = parse_or("LEXHUB_RECONNECT_TOKEN_TTL_SECS", &env, 300);
        let processor_timeout_secs = parse_or("LEXHUB_PROCESSOR_TIMEOUT_SECS", &env, 30);

        let voice_phone_number =
            env("LEXHUB_VOICE_PHONE_NUMBER").unwrap_or_else(|_| "1-844-967-3536".into());

        let history_page_size = parse_or("LEXHUB_HISTORY_PAGE_SIZE", &env, 20);
        let notification_backlog = parse_or("LEXHUB_NOTIFICATION_BACKLOG", &env, 10);

        Self {
            listen_addr,
            jwt_secret,
            log_filter,
            rate_limit_window_ms,
            rate_limit_max_messages,
            reconnect_token_ttl_secs,
            processor_timeout_secs,
            voice_phone_number,
            history_page_size,
            notification_backlog,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == "lexhub_local_development_jwt_secret_must_be_32_chars"
    }
}

fn parse_or<T, F>(key: &str, env: &F, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    env(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
