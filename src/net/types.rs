//! Wire DTOs for the `/auth/*` endpoints and the credential newtype.
//!
//! DESIGN
//! ======
//! Field names follow the remote API (`credits`, `is_admin`, `access_token`);
//! Rust-side names describe what the values mean (`credit_balance`).

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// CREDENTIAL
// =============================================================================

/// Opaque bearer token proving session identity to the remote API.
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

// =============================================================================
// PROFILE
// =============================================================================

/// Account attributes as known by the remote system (`GET /auth/me`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "deserialize_i64_from_number")]
    pub id: i64,
    pub email: String,
    /// Remaining generation credits.
    #[serde(rename = "credits", deserialize_with = "deserialize_i64_from_number")]
    pub credit_balance: i64,
    /// Account creation timestamp as sent by the server.
    #[serde(default)]
    pub created_at: String,
}

/// Privilege status (`GET /auth/admin-status`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminStatus {
    pub is_admin: bool,
}

// =============================================================================
// AUTH EXCHANGE
// =============================================================================

/// Body for `POST /auth/login` and `POST /auth/register`.
#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Response from `POST /auth/login` and `POST /auth/register`.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

impl TokenResponse {
    #[must_use]
    pub fn into_credential(self) -> Credential {
        Credential::new(self.access_token)
    }
}

/// Error body shape: `{"detail": "..."}` or `{"detail": [{"msg": "..."}, ...]}`.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    detail: serde_json::Value,
}

impl ErrorBody {
    /// Human-readable message: the string detail, else the first validation `msg`.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            serde_json::Value::Array(items) => items
                .iter()
                .find_map(|item| item.get("msg").and_then(serde_json::Value::as_str))
                .map(str::to_owned),
            _ => None,
        }
    }
}

/// Extract the `detail` message from a raw error body, if it has one.
#[must_use]
pub fn error_detail(body: &str) -> Option<String> {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message(),
        Err(_) => None,
    }
}

fn deserialize_i64_from_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Ok(int);
            }
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            if let Some(float) = number.as_f64()
                && float.is_finite()
                && float.fract() == 0.0
                && float >= i64::MIN as f64
                && float <= i64::MAX as f64
            {
                return Ok(float as i64);
            }
            Err(D::Error::custom("expected integer-compatible number"))
        }
        _ => Err(D::Error::custom("expected number")),
    }
}
