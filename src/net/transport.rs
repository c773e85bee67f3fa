//! Transport Guard: credential attachment and auth-failure interception.
//!
//! ARCHITECTURE
//! ============
//! Every API call goes through [`TransportGuard::send`]. On the way out the
//! durable credential (if any) is attached as a bearer header; on the way in
//! a 401 on a request that carried a credential forces logout and emits a
//! [`SessionEvent::Invalidated`] for the top-level listener to redirect on.
//!
//! The network itself sits behind [`HttpBackend`] so the session core can be
//! driven by scripted backends in tests.
//!
//! TRADE-OFFS
//! ==========
//! Forced logout is keyed on the credential the failing request actually
//! sent. The comparison and the cleanup share one lock, so N simultaneous
//! 401s produce exactly one logout, and a late 401 for a credential that a
//! fresh login already replaced is ignored instead of killing the new
//! session. With a Session Store attached that lock is the store's own, the
//! one it also holds while installing a credential.
//!
//! The guard owns reads and writes of the durable credential. A credential
//! the store failed to delete is revoked in memory, so logout still takes
//! effect on the wire.

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::types::{Credential, error_detail};
use crate::config::HttpTimeouts;
use crate::error::{AUTH_FAILURE_STATUS, StorageError, TransportAuthError, TransportError};
use crate::storage::CredentialStore;

const EVENT_CHANNEL_CAPACITY: usize = 16;
const REQUEST_ID_HEADER: &str = "x-request-id";

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Whether the guard attaches the current credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Attach the durable credential when one exists.
    Attach,
    /// Never attach; auth failures are plain responses.
    Public,
}

/// A request as built by callers.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub auth: AuthMode,
}

impl ApiRequest {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::Get, path: path.into(), body: None, auth: AuthMode::Attach }
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self { method: Method::Post, path: path.into(), body: Some(body), auth: AuthMode::Attach }
    }

    /// `POST` with a serializable body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Parse`] if the body cannot be encoded.
    pub fn post_json<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, TransportError> {
        let body = serde_json::to_value(body).map_err(|e| TransportError::Parse(e.to_string()))?;
        Ok(Self::post(path, body))
    }

    /// Mark the request as public: no credential, no forced logout.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.auth = AuthMode::Public;
        self
    }
}

/// A request as handed to the backend, credential already resolved.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub request_id: Uuid,
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode a 2xx body, or map the status and `detail` into an error.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Status`] for non-2xx responses and
    /// [`TransportError::Parse`] for undecodable bodies.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        if !self.is_success() {
            return Err(TransportError::Status { status: self.status, detail: error_detail(&self.body) });
        }
        serde_json::from_str(&self.body).map_err(|e| TransportError::Parse(e.to_string()))
    }
}

// =============================================================================
// BACKEND
// =============================================================================

/// Performs one HTTP exchange. Implementations must not retry.
#[async_trait::async_trait]
pub trait HttpBackend: Send + Sync {
    /// Send the request and return the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] when no response was received.
    async fn execute(&self, request: OutboundRequest) -> Result<ApiResponse, TransportError>;
}

/// Production backend over `reqwest`.
pub struct ReqwestBackend {
    http: reqwest::Client,
    base_url: String,
}

impl ReqwestBackend {
    /// Build a backend for `base_url` (no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(base_url: impl Into<String>, timeouts: HttpTimeouts) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeouts.request())
            .connect_timeout(timeouts.connect())
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.into() })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: OutboundRequest) -> Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
        };
        builder = builder.header(REQUEST_ID_HEADER, request.request_id.to_string());
        if let Some(credential) = &request.credential {
            builder = builder.header(reqwest::header::AUTHORIZATION, credential.bearer());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(ApiResponse { status, body })
    }
}

// =============================================================================
// GUARD
// =============================================================================

/// Emitted by the guard; consumed by a top-level listener that navigates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The server rejected the active credential and the session was reset.
    Invalidated { status: u16 },
}

/// Cleanup target for forced logout. Implemented by the Session Store.
pub trait SessionReset: Send + Sync {
    /// If `sent` is still the active credential, clear it and the in-memory
    /// session, starting a new generation so in-flight fetches are discarded.
    /// The comparison and the cleanup must be atomic with respect to the
    /// implementor's own credential writes. Returns whether it reset.
    fn reset_session(&self, sent: &Credential) -> bool;
}

/// Wraps every outbound request with the credential and intercepts auth
/// failures. Cheap to clone.
#[derive(Clone)]
pub struct TransportGuard {
    inner: Arc<GuardInner>,
}

struct GuardInner {
    backend: Arc<dyn HttpBackend>,
    credentials: Arc<dyn CredentialStore>,
    events: broadcast::Sender<SessionEvent>,
    reset_target: Mutex<Option<Weak<dyn SessionReset>>>,
    /// A credential whose removal from the store failed. Treated as absent
    /// until a credential is stored through the guard again.
    revoked: Mutex<Option<Credential>>,
    /// Serializes the compare-and-clear in [`TransportGuard::invalidate`].
    invalidation: Mutex<()>,
}

impl TransportGuard {
    #[must_use]
    pub fn new(backend: Arc<dyn HttpBackend>, credentials: Arc<dyn CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(GuardInner {
                backend,
                credentials,
                events,
                reset_target: Mutex::new(None),
                revoked: Mutex::new(None),
                invalidation: Mutex::new(()),
            }),
        }
    }

    /// Receive session invalidation events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Route forced logout through `target` instead of clearing the
    /// credential directly. Held weakly.
    pub fn attach_session(&self, target: Weak<dyn SessionReset>) {
        *self
            .inner
            .reset_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(target);
    }

    /// The credential requests are sent with: the stored one, unless its
    /// removal failed earlier.
    pub(crate) fn durable_credential(&self) -> Option<Credential> {
        let stored = match self.inner.credentials.load() {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(error = %e, "could not read stored credential; treating as logged out");
                None
            }
        };
        let revoked = self.inner.revoked.lock().unwrap_or_else(PoisonError::into_inner);
        match (stored, revoked.as_ref()) {
            (Some(stored), Some(revoked)) if &stored == revoked => None,
            (stored, _) => stored,
        }
    }

    /// Persist a freshly issued credential and lift any revocation.
    pub(crate) fn store_credential(&self, credential: &Credential) -> Result<(), StorageError> {
        self.inner.credentials.save(credential)?;
        *self.inner.revoked.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    /// Remove the stored credential. If the store refuses, the credential is
    /// revoked in memory so no further request carries it.
    pub(crate) fn clear_credential(&self) {
        let current = self.durable_credential();
        if let Err(e) = self.inner.credentials.clear() {
            tracing::warn!(error = %e, "failed to clear stored credential; revoking it in memory");
            if let Some(current) = current {
                *self.inner.revoked.lock().unwrap_or_else(PoisonError::into_inner) = Some(current);
            }
        }
    }

    /// Send a request, attaching the credential per its [`AuthMode`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Auth`] when the request carried the active
    /// credential and the server rejected it; forced logout has run by then.
    /// Network failures come back as [`TransportError::Request`]. Other
    /// statuses, including a 401 on a public request, are returned as `Ok`.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let credential = match request.auth {
            AuthMode::Attach => self.durable_credential(),
            AuthMode::Public => None,
        };
        let outbound = OutboundRequest {
            request_id: Uuid::new_v4(),
            method: request.method,
            path: request.path,
            body: request.body,
            credential: credential.clone(),
        };
        let request_id = outbound.request_id;
        let method = outbound.method;
        let path = outbound.path.clone();
        tracing::debug!(%request_id, %method, %path, authenticated = credential.is_some(), "sending request");

        let response = match self.inner.backend.execute(outbound).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(%request_id, %method, %path, error = %e, "request failed");
                return Err(e);
            }
        };

        if response.status == AUTH_FAILURE_STATUS {
            if let Some(sent) = credential {
                if self.invalidate(&sent, response.status) {
                    return Err(TransportAuthError { status: response.status }.into());
                }
                tracing::debug!(%request_id, %path, "auth failure for an inactive credential ignored");
            }
        }
        Ok(response)
    }

    /// Send and decode a JSON response.
    ///
    /// # Errors
    ///
    /// See [`TransportGuard::send`] and [`ApiResponse::decode`].
    pub async fn fetch_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, TransportError> {
        self.send(request).await?.decode()
    }

    /// Authenticated `GET` decoding a JSON response.
    ///
    /// # Errors
    ///
    /// See [`TransportGuard::fetch_json`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        self.fetch_json(ApiRequest::get(path)).await
    }

    /// Run forced logout if `sent` is still the durable credential. Returns
    /// whether this call performed it.
    fn invalidate(&self, sent: &Credential, status: u16) -> bool {
        let _serial = self
            .inner
            .invalidation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let target = self
            .inner
            .reset_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        let performed = match target {
            Some(session) => session.reset_session(sent),
            None if self.durable_credential().as_ref() == Some(sent) => {
                self.clear_credential();
                true
            }
            None => false,
        };
        if !performed {
            return false;
        }

        tracing::warn!(status, "credential rejected by server; session invalidated");
        if self
            .inner
            .events
            .send(SessionEvent::Invalidated { status })
            .is_err()
        {
            tracing::debug!("no invalidation listeners subscribed");
        }
        true
    }
}
