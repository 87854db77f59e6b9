//! Server configuration, loaded from environment variables at startup.

/// Runtime configuration for parley-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.  The Gemini API key itself is
/// read by the provider client from `GEMINI_API_KEY`.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// SQLite (or other) database URL (default: `"sqlite://parley.db"`).
    /// Supports any sqlx-compatible connection string.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Serve Swagger UI at `/swagger-ui` (default: `true`).
    pub enable_swagger: bool,

    /// Comma-separated CORS origin allow-list; wildcard when unset.
    pub cors_allowed_origins: Option<String>,

    /// Provider model identifier passed to the gateway.
    pub model: String,

    /// Lifetime of login session tokens, in hours.
    pub session_ttl_hours: i64,

    /// Base URL used when building password-reset links.
    pub public_url: String,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("PARLEY_BIND", "0.0.0.0:3000"),
            database_url: env_or("PARLEY_DATABASE_URL", "sqlite://parley.db"),
            log_level: env_or("PARLEY_LOG", "info"),
            log_json: flag_env("PARLEY_LOG_JSON", false),
            enable_swagger: flag_env("PARLEY_ENABLE_SWAGGER", true),
            cors_allowed_origins: std::env::var("PARLEY_CORS_ORIGINS").ok(),
            model: env_or("PARLEY_MODEL", "gemini-2.5-flash"),
            session_ttl_hours: parse_env("PARLEY_SESSION_TTL_HOURS", 720),
            public_url: env_or("PARLEY_PUBLIC_URL", "http://localhost:3000"),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn flag_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
