//! Scripted backend and fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::config::LogoutPolicy;
use crate::error::{StorageError, TransportError};
use crate::net::api::{ADMIN_STATUS_PATH, ME_PATH};
use crate::net::transport::{ApiResponse, HttpBackend, Method, OutboundRequest, TransportGuard};
use crate::net::types::Credential;
use crate::state::session::SessionStore;
use crate::storage::{CredentialStore, MemoryCredentialStore};

// =============================================================================
// SCRIPTED BACKEND
// =============================================================================

/// One scripted reply for a `(method, path)` pair.
pub struct Step {
    status: u16,
    body: String,
    network_error: Option<String>,
    gate: Option<Arc<Notify>>,
}

impl Step {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self { status, body: value.to_string(), network_error: None, gate: None }
    }

    pub fn ok(value: serde_json::Value) -> Self {
        Self::json(200, value)
    }

    pub fn unauthorized() -> Self {
        Self::json(401, serde_json::json!({"detail": "Invalid authentication credentials"}))
    }

    pub fn network_error(message: &str) -> Self {
        Self { status: 0, body: String::new(), network_error: Some(message.to_owned()), gate: None }
    }

    /// Hold the reply until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

/// Replays queued [`Step`]s per route and records every request it sees.
/// An unscripted route answers 404.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<(Method, String), VecDeque<Step>>>,
    calls: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, method: Method, path: &str, step: Step) {
        self.scripts
            .lock()
            .unwrap()
            .entry((method, path.to_owned()))
            .or_default()
            .push_back(step);
    }

    pub fn calls(&self) -> Vec<OutboundRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    /// Yield until at least `n` requests have reached the backend.
    pub async fn wait_for_calls(&self, n: usize) {
        while self.calls.lock().unwrap().len() < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait::async_trait]
impl HttpBackend for ScriptedBackend {
    async fn execute(&self, request: OutboundRequest) -> Result<ApiResponse, TransportError> {
        let key = (request.method, request.path.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        let gate = step.as_ref().and_then(|s| s.gate.clone());
        let notified = gate.as_ref().map(|g| g.notified());
        self.calls.lock().unwrap().push(request);

        if let Some(notified) = notified {
            notified.await;
        }

        match step {
            None => Ok(ApiResponse { status: 404, body: r#"{"detail": "Not Found"}"#.to_owned() }),
            Some(Step { network_error: Some(message), .. }) => Err(TransportError::Request(message)),
            Some(Step { status, body, .. }) => Ok(ApiResponse { status, body }),
        }
    }
}

/// Credential store whose `clear` always fails, as with a read-only state
/// directory. Clones share the slot.
#[derive(Clone, Default)]
pub struct StuckStore {
    inner: MemoryCredentialStore,
}

impl CredentialStore for StuckStore {
    fn load(&self) -> Result<Option<Credential>, StorageError> {
        self.inner.load()
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        self.inner.save(credential)
    }

    fn clear(&self) -> Result<(), StorageError> {
        Err(std::io::Error::other("read-only file system").into())
    }
}

// =============================================================================
// FIXTURES
// =============================================================================

pub fn profile_json(id: i64, email: &str, credits: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "email": email,
        "credits": credits,
        "created_at": "2024-05-01T10:00:00",
    })
}

pub fn admin_json(is_admin: bool) -> serde_json::Value {
    serde_json::json!({ "is_admin": is_admin })
}

/// Queue a successful combined fetch.
pub fn script_combined_ok(backend: &ScriptedBackend, profile: serde_json::Value, is_admin: bool) {
    backend.push(Method::Get, ME_PATH, Step::ok(profile));
    backend.push(Method::Get, ADMIN_STATUS_PATH, Step::ok(admin_json(is_admin)));
}

pub struct Fixture {
    pub backend: Arc<ScriptedBackend>,
    pub credentials: MemoryCredentialStore,
    pub guard: TransportGuard,
    pub store: SessionStore,
}

/// Store wired to a scripted backend, optionally with a persisted credential.
pub fn fixture(stored: Option<&str>, policy: LogoutPolicy) -> Fixture {
    let backend = ScriptedBackend::new();
    let credentials = match stored {
        Some(token) => MemoryCredentialStore::with_credential(Credential::new(token)),
        None => MemoryCredentialStore::new(),
    };
    let guard = TransportGuard::new(backend.clone(), Arc::new(credentials.clone()));
    let store = SessionStore::new(guard.clone(), policy);
    Fixture { backend, credentials, guard, store }
}
