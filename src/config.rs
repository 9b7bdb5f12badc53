use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:8000,http://127.0.0.1:8000";

/// Process-wide, read-only settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub supabase_url: String,
    pub supabase_key: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Bound applied to outbound LLM and datastore calls (None => wait forever).
    pub http_timeout: Option<Duration>,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let port = parse_optional_u64("API_PORT")?
            .map(|p| u16::try_from(p).map_err(|_| anyhow!("API_PORT must be a valid port number")))
            .transpose()?
            .unwrap_or(DEFAULT_PORT);

        let cors_origins = parse_origins(
            &env::var("CORS_ORIGINS").unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.to_string()),
        );

        Ok(Self {
            openai_api_key: string_env("OPENAI_API_KEY", ""),
            openai_model: string_env("OPENAI_MODEL", DEFAULT_MODEL),
            openai_base_url: string_env("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
            supabase_url: string_env("SUPABASE_URL", ""),
            supabase_key: string_env("SUPABASE_KEY", ""),
            host: string_env("API_HOST", DEFAULT_HOST),
            port,
            cors_origins,
            http_timeout: parse_optional_u64("HTTP_TIMEOUT_SECS")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            max_request_bytes: parse_optional_u64("MAX_REQUEST_BYTES")?.map(|v| v as usize),
        })
    }

    pub fn openai_configured(&self) -> bool {
        !self.openai_api_key.is_empty()
    }

    pub fn supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_key.is_empty()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn string_env(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
