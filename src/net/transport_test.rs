use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use super::*;
use crate::storage::MemoryCredentialStore;
use crate::test_helpers::{ScriptedBackend, Step, StuckStore};

const REQUESTS_PATH: &str = "/ai/requests";

fn guard_with(backend: &Arc<ScriptedBackend>, stored: Option<&str>) -> (TransportGuard, MemoryCredentialStore) {
    let credentials = match stored {
        Some(token) => MemoryCredentialStore::with_credential(Credential::new(token)),
        None => MemoryCredentialStore::new(),
    };
    let guard = TransportGuard::new(backend.clone(), Arc::new(credentials.clone()));
    (guard, credentials)
}

/// Counts forced-logout calls routed through the guard.
#[derive(Default)]
struct CountingReset {
    credentials: MemoryCredentialStore,
    resets: AtomicUsize,
}

impl SessionReset for CountingReset {
    fn reset_session(&self, sent: &Credential) -> bool {
        if self.credentials.load().unwrap().as_ref() != Some(sent) {
            return false;
        }
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.credentials.clear().unwrap();
        true
    }
}

// =============================================================================
// request path
// =============================================================================

#[tokio::test]
async fn attaches_durable_credential_at_send_time() {
    let backend = ScriptedBackend::new();
    backend.push(Method::Get, REQUESTS_PATH, Step::ok(serde_json::json!([])));
    backend.push(Method::Get, REQUESTS_PATH, Step::ok(serde_json::json!([])));
    let (guard, credentials) = guard_with(&backend, Some("first"));

    guard.send(ApiRequest::get(REQUESTS_PATH)).await.unwrap();
    credentials.save(&Credential::new("second")).unwrap();
    guard.send(ApiRequest::get(REQUESTS_PATH)).await.unwrap();

    let calls = backend.calls();
    assert_eq!(calls[0].credential, Some(Credential::new("first")));
    assert_eq!(calls[1].credential, Some(Credential::new("second")));
}

#[tokio::test]
async fn sends_unauthenticated_without_credential() {
    let backend = ScriptedBackend::new();
    backend.push(Method::Get, REQUESTS_PATH, Step::ok(serde_json::json!([])));
    let (guard, _) = guard_with(&backend, None);

    guard.send(ApiRequest::get(REQUESTS_PATH)).await.unwrap();
    assert!(backend.calls()[0].credential.is_none());
}

#[tokio::test]
async fn public_request_never_carries_credential() {
    let backend = ScriptedBackend::new();
    backend.push(Method::Post, "/auth/login", Step::ok(serde_json::json!({"access_token": "t"})));
    let (guard, _) = guard_with(&backend, Some("tok"));

    guard
        .send(ApiRequest::post("/auth/login", serde_json::json!({})).public())
        .await
        .unwrap();
    assert!(backend.calls()[0].credential.is_none());
}

#[tokio::test]
async fn every_request_gets_a_distinct_request_id() {
    let backend = ScriptedBackend::new();
    let (guard, _) = guard_with(&backend, None);

    guard.send(ApiRequest::get("/a")).await.unwrap();
    guard.send(ApiRequest::get("/b")).await.unwrap();
    let calls = backend.calls();
    assert_ne!(calls[0].request_id, calls[1].request_id);
}

// =============================================================================
// response path
// =============================================================================

#[tokio::test]
async fn auth_failure_clears_credential_and_emits_event() {
    let backend = ScriptedBackend::new();
    backend.push(Method::Get, REQUESTS_PATH, Step::unauthorized());
    let (guard, credentials) = guard_with(&backend, Some("tok"));
    let mut events = guard.subscribe();

    let err = guard.send(ApiRequest::get(REQUESTS_PATH)).await.unwrap_err();

    assert_eq!(err, TransportError::Auth(TransportAuthError { status: 401 }));
    assert!(credentials.load().unwrap().is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Invalidated { status: 401 });
}

#[tokio::test]
async fn auth_failure_routes_through_attached_session() {
    let backend = ScriptedBackend::new();
    backend.push(Method::Get, REQUESTS_PATH, Step::unauthorized());
    let target = Arc::new(CountingReset::default());
    target.credentials.save(&Credential::new("tok")).unwrap();
    let guard = TransportGuard::new(backend.clone(), Arc::new(target.credentials.clone()));
    let weak: Weak<CountingReset> = Arc::downgrade(&target);
    guard.attach_session(weak);

    assert!(guard.send(ApiRequest::get(REQUESTS_PATH)).await.is_err());
    assert_eq!(target.resets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_auth_failures_invalidate_exactly_once() {
    let backend = ScriptedBackend::new();
    let gate = Arc::new(Notify::new());
    for _ in 0..3 {
        backend.push(Method::Get, REQUESTS_PATH, Step::unauthorized().gated(gate.clone()));
    }
    let target = Arc::new(CountingReset::default());
    target.credentials.save(&Credential::new("tok")).unwrap();
    let guard = TransportGuard::new(backend.clone(), Arc::new(target.credentials.clone()));
    let weak: Weak<CountingReset> = Arc::downgrade(&target);
    guard.attach_session(weak);
    let mut events = guard.subscribe();

    let release = async {
        backend.wait_for_calls(3).await;
        gate.notify_waiters();
    };
    let (a, b, c, ()) = tokio::join!(
        guard.send(ApiRequest::get(REQUESTS_PATH)),
        guard.send(ApiRequest::get(REQUESTS_PATH)),
        guard.send(ApiRequest::get(REQUESTS_PATH)),
        release,
    );

    assert!(backend.calls().iter().all(|c| c.credential == Some(Credential::new("tok"))));
    assert_eq!(target.resets.load(Ordering::SeqCst), 1);
    let forced: usize = [&a, &b, &c]
        .iter()
        .filter(|r| matches!(r, Err(TransportError::Auth(_))))
        .count();
    assert_eq!(forced, 1);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Invalidated { status: 401 });
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn late_auth_failure_for_replaced_credential_is_ignored() {
    let backend = ScriptedBackend::new();
    let gate = Arc::new(Notify::new());
    backend.push(Method::Get, REQUESTS_PATH, Step::unauthorized().gated(gate.clone()));
    let (guard, credentials) = guard_with(&backend, Some("old"));
    let mut events = guard.subscribe();

    let replace = async {
        backend.wait_for_calls(1).await;
        credentials.save(&Credential::new("fresh")).unwrap();
        gate.notify_waiters();
    };
    let (result, ()) = tokio::join!(guard.send(ApiRequest::get(REQUESTS_PATH)), replace);

    let response = result.unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(credentials.load().unwrap(), Some(Credential::new("fresh")));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn unauthenticated_401_does_not_emit() {
    let backend = ScriptedBackend::new();
    backend.push(Method::Get, REQUESTS_PATH, Step::unauthorized());
    let (guard, _) = guard_with(&backend, None);
    let mut events = guard.subscribe();

    let response = guard.send(ApiRequest::get(REQUESTS_PATH)).await.unwrap();
    assert_eq!(response.status, 401);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn network_error_propagates_without_invalidation() {
    let backend = ScriptedBackend::new();
    backend.push(Method::Get, REQUESTS_PATH, Step::network_error("connection reset"));
    let (guard, credentials) = guard_with(&backend, Some("tok"));

    let err = guard.send(ApiRequest::get(REQUESTS_PATH)).await.unwrap_err();
    assert_eq!(err, TransportError::Request("connection reset".into()));
    assert!(credentials.load().unwrap().is_some());
}

#[tokio::test]
async fn server_error_is_returned_as_response() {
    let backend = ScriptedBackend::new();
    backend.push(Method::Get, REQUESTS_PATH, Step::json(503, serde_json::json!({"detail": "down"})));
    let (guard, credentials) = guard_with(&backend, Some("tok"));

    let err = guard
        .get_json::<serde_json::Value>(REQUESTS_PATH)
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Status { status: 503, detail: Some("down".into()) });
    assert!(credentials.load().unwrap().is_some());
}

// =============================================================================
// decode
// =============================================================================

#[test]
fn decode_rejects_non_json_success_body() {
    let response = ApiResponse { status: 200, body: "not json".into() };
    assert!(matches!(response.decode::<serde_json::Value>(), Err(TransportError::Parse(_))));
}

#[test]
fn post_json_encodes_body() {
    let req = ApiRequest::post_json("/x", &serde_json::json!({"k": 1})).unwrap();
    assert_eq!(req.method, Method::Post);
    assert_eq!(req.body, Some(serde_json::json!({"k": 1})));
    assert_eq!(req.auth, AuthMode::Attach);
}

#[test]
fn method_display() {
    assert_eq!(Method::Get.to_string(), "GET");
    assert_eq!(Method::Post.to_string(), "POST");
}

// =============================================================================
// durable credential
// =============================================================================

#[tokio::test]
async fn failed_clear_revokes_credential_in_memory() {
    let backend = ScriptedBackend::new();
    for _ in 0..3 {
        backend.push(Method::Get, REQUESTS_PATH, Step::unauthorized());
    }
    let stuck = StuckStore::default();
    stuck.save(&Credential::new("tok")).unwrap();
    let guard = TransportGuard::new(backend.clone(), Arc::new(stuck.clone()));
    let mut events = guard.subscribe();

    let first = guard.send(ApiRequest::get(REQUESTS_PATH)).await;
    let second = guard.send(ApiRequest::get(REQUESTS_PATH)).await.unwrap();
    let third = guard.send(ApiRequest::get(REQUESTS_PATH)).await.unwrap();

    assert!(matches!(first, Err(TransportError::Auth(_))));
    assert_eq!((second.status, third.status), (401, 401));
    assert_eq!(stuck.load().unwrap(), Some(Credential::new("tok")));
    let calls = backend.calls();
    assert!(calls[0].credential.is_some());
    assert!(calls[1].credential.is_none());
    assert!(calls[2].credential.is_none());
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Invalidated { status: 401 });
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn storing_a_credential_lifts_revocation() {
    let backend = ScriptedBackend::new();
    backend.push(Method::Get, REQUESTS_PATH, Step::unauthorized());
    backend.push(Method::Get, REQUESTS_PATH, Step::ok(serde_json::json!([])));
    let stuck = StuckStore::default();
    stuck.save(&Credential::new("tok")).unwrap();
    let guard = TransportGuard::new(backend.clone(), Arc::new(stuck));

    assert!(guard.send(ApiRequest::get(REQUESTS_PATH)).await.is_err());
    assert_eq!(guard.durable_credential(), None);

    guard.store_credential(&Credential::new("tok")).unwrap();
    guard.send(ApiRequest::get(REQUESTS_PATH)).await.unwrap();
    assert_eq!(backend.calls()[1].credential, Some(Credential::new("tok")));
}

#[tokio::test]
async fn attached_session_declines_reset_for_stale_credential() {
    let backend = ScriptedBackend::new();
    backend.push(Method::Get, REQUESTS_PATH, Step::unauthorized());
    let target = Arc::new(CountingReset::default());
    target.credentials.save(&Credential::new("tok")).unwrap();
    let guard = TransportGuard::new(backend.clone(), Arc::new(target.credentials.clone()));
    let weak: Weak<CountingReset> = Arc::downgrade(&target);
    guard.attach_session(weak);
    let mut events = guard.subscribe();

    assert!(!target.reset_session(&Credential::new("other")));
    let response = guard.send(ApiRequest::get(REQUESTS_PATH)).await;

    assert!(response.is_err());
    assert_eq!(target.resets.load(Ordering::SeqCst), 1);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Invalidated { status: 401 });
}
