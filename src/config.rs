//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse failed: {0}")]
    Parse(String),
}

/// What a failed combined profile/privilege fetch does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogoutPolicy {
    /// Any failure (network, server error, rejected credential) logs out.
    #[default]
    AnyFailure,
    /// Only an authentication failure logs out; transient failures keep the
    /// current state.
    AuthFailureOnly,
}

impl std::str::FromStr for LogoutPolicy {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "any_failure" => Ok(Self::AnyFailure),
            "auth_failure" => Ok(Self::AuthFailureOnly),
            other => Err(ConfigError::Parse(format!(
                "unknown AIGEN_LOGOUT_POLICY '{other}' (expected 'any_failure' or 'auth_failure')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl HttpTimeouts {
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API origin without a trailing slash.
    pub api_base_url: String,
    /// Override for the credential storage root. `None` uses the platform dir.
    pub state_dir: Option<PathBuf>,
    pub timeouts: HttpTimeouts,
    pub logout_policy: LogoutPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            state_dir: None,
            timeouts: HttpTimeouts::default(),
            logout_policy: LogoutPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `AIGEN_API_BASE_URL`: default `http://localhost:8000`
    /// - `AIGEN_STATE_DIR`: platform config dir when absent
    /// - `AIGEN_REQUEST_TIMEOUT_SECS`: default 30
    /// - `AIGEN_CONNECT_TIMEOUT_SECS`: default 10
    /// - `AIGEN_LOGOUT_POLICY`: `any_failure` (default) or `auth_failure`
    ///
    /// # Errors
    ///
    /// Returns an error if the logout policy is not recognized.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if the logout policy is not recognized.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = lookup("AIGEN_API_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| DEFAULT_API_BASE_URL.to_owned(), |v| normalize_base_url(&v));
        let state_dir = lookup("AIGEN_STATE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let timeouts = HttpTimeouts {
            request_secs: parse_u64(&lookup, "AIGEN_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_u64(&lookup, "AIGEN_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        let logout_policy = match lookup("AIGEN_LOGOUT_POLICY") {
            Some(raw) => raw.parse()?,
            None => LogoutPolicy::default(),
        };

        Ok(Self { api_base_url, state_dir, timeouts, logout_policy })
    }
}

/// Strip surrounding whitespace and trailing slashes from an API origin.
#[must_use]
pub fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_owned()
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
