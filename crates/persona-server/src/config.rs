use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use persona_relay::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use persona_relay::{GeminiConfig, RetryPolicy};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "fallback-secret-change-this",
];

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub admin_password: String,
    pub secure_cookies: bool,
    pub gemini: GeminiConfig,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("PERSONA_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PERSONA_JWT_SECRET is unset or still a placeholder");
        }

        let admin_password = lookup("PERSONA_ADMIN_PASSWORD").unwrap_or_default();
        if admin_password.is_empty() {
            bail!("PERSONA_ADMIN_PASSWORD must be set");
        }

        let api_key = lookup("GEMINI_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            bail!("GEMINI_API_KEY is not set");
        }

        let port: u16 = var("PERSONA_PORT", "3000")
            .parse()
            .context("PERSONA_PORT must be a port number")?;
        let timeout_secs: u64 = var("PERSONA_GEMINI_TIMEOUT_SECS", "60")
            .parse()
            .context("PERSONA_GEMINI_TIMEOUT_SECS must be a number of seconds")?;
        let retry_base_ms: u64 = var("PERSONA_RETRY_BASE_MS", "1000")
            .parse()
            .context("PERSONA_RETRY_BASE_MS must be a number of milliseconds")?;

        let mut gemini = GeminiConfig::new(api_key);
        gemini.model = var("PERSONA_GEMINI_MODEL", DEFAULT_MODEL);
        gemini.base_url = var("PERSONA_GEMINI_BASE_URL", DEFAULT_BASE_URL);
        gemini.timeout = Duration::from_secs(timeout_secs);

        Ok(Self {
            host: var("PERSONA_HOST", "0.0.0.0"),
            port,
            db_path: var("PERSONA_DB_PATH", "persona.db").into(),
            jwt_secret,
            admin_password,
            secure_cookies: matches!(
                var("PERSONA_SECURE_COOKIES", "false").as_str(),
                "1" | "true" | "yes"
            ),
            gemini,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(retry_base_ms),
                ..RetryPolicy::default()
            },
        })
    }
}
