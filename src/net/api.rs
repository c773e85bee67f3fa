//! Endpoint wrappers for the `/auth/*` API.
//!
//! ERROR HANDLING
//! ==============
//! Login and registration map every failure to a [`CredentialError`] carrying
//! the server's `detail` text (or a generic fallback) for display. The
//! profile and privilege fetches return raw [`TransportError`]s; the Session
//! Store decides what a failure means for the session.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use super::transport::{ApiRequest, TransportGuard};
use super::types::{AdminStatus, AuthRequest, Credential, TokenResponse, UserProfile};
use crate::error::{CredentialError, TransportError};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const ME_PATH: &str = "/auth/me";
pub const ADMIN_STATUS_PATH: &str = "/auth/admin-status";

pub const LOGIN_FAILED_MESSAGE: &str = "Login failed";
pub const REGISTRATION_FAILED_MESSAGE: &str = "Registration failed";

/// Exchange an email/password pair for a credential via `POST /auth/login`.
///
/// # Errors
///
/// Returns a [`CredentialError`] if the server rejects the pair or cannot be reached.
pub async fn login(guard: &TransportGuard, email: &str, password: &str) -> Result<Credential, CredentialError> {
    exchange(guard, LOGIN_PATH, email, password, LOGIN_FAILED_MESSAGE).await
}

/// Create an account and obtain a credential via `POST /auth/register`.
///
/// # Errors
///
/// Returns a [`CredentialError`] if registration is refused or the server cannot be reached.
pub async fn register(guard: &TransportGuard, email: &str, password: &str) -> Result<Credential, CredentialError> {
    exchange(guard, REGISTER_PATH, email, password, REGISTRATION_FAILED_MESSAGE).await
}

async fn exchange(
    guard: &TransportGuard,
    path: &str,
    email: &str,
    password: &str,
    fallback: &str,
) -> Result<Credential, CredentialError> {
    let request = ApiRequest::post_json(path, &AuthRequest { email, password })
        .map_err(|e| CredentialError::from_transport(e, fallback))?
        .public();
    let token: TokenResponse = guard
        .fetch_json(request)
        .await
        .map_err(|e| CredentialError::from_transport(e, fallback))?;
    tracing::info!(%path, token_type = %token.token_type, "credential issued");
    Ok(token.into_credential())
}

/// Fetch the current account via `GET /auth/me`.
///
/// # Errors
///
/// Returns the transport failure unchanged.
pub async fn fetch_profile(guard: &TransportGuard) -> Result<UserProfile, TransportError> {
    guard.get_json(ME_PATH).await
}

/// Fetch the privilege flag via `GET /auth/admin-status`.
///
/// # Errors
///
/// Returns the transport failure unchanged.
pub async fn fetch_admin_status(guard: &TransportGuard) -> Result<AdminStatus, TransportError> {
    guard.get_json(ADMIN_STATUS_PATH).await
}
