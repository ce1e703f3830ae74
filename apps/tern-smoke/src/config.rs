use std::fmt;

use tern_reticulum::Endpoint;

const DEFAULT_ENDPOINT: &str = "tcp://127.0.0.1:4242";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_WATCH_MS: u64 = 1_500;

/// Environment-driven settings for a smoke run.
#[derive(Debug, Clone)]
pub struct SmokeConfig {
    /// Endpoint a real wire implementation would dial.
    pub endpoint: Endpoint,
    /// Deadline for connect and the readiness wait.
    pub connect_timeout_ms: u64,
    /// How long to watch the event streams before disconnecting.
    pub watch_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid value '{value}' for {key}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl SmokeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_endpoint = lookup("TERN_ENDPOINT")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned());
        let endpoint =
            Endpoint::parse(&raw_endpoint).map_err(|err| ConfigError::InvalidValue {
                key: "TERN_ENDPOINT",
                value: raw_endpoint.clone(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            endpoint,
            connect_timeout_ms: parse_u64_with_default(
                lookup,
                "TERN_SMOKE_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            )?,
            watch_ms: parse_u64_with_default(lookup, "TERN_SMOKE_WATCH_MS", DEFAULT_WATCH_MS)?,
        })
    }
}

fn parse_u64_with_default(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }
    trimmed.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.clone(),
        reason: "expected an unsigned integer".to_owned(),
    })
}
