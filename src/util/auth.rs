//! Top-level reaction to transport-forced logout.
//!
//! SYSTEM CONTEXT
//! ==============
//! The Transport Guard never navigates. It publishes
//! [`SessionEvent::Invalidated`], and the one listener installed here sends
//! the user back to sign-in.

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_test;

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::net::transport::SessionEvent;

/// Presentation hook for the unauthenticated entry point.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self);
}

/// Redirect once per invalidation event until the guard is dropped.
pub fn spawn_invalidation_listener(
    mut events: broadcast::Receiver<SessionEvent>,
    navigator: Arc<dyn Navigator>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Invalidated { status }) => {
                    tracing::info!(status, "session invalidated; redirecting to login");
                    navigator.redirect_to_login();
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "invalidation listener lagged");
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("invalidation channel closed");
                    break;
                }
            }
        }
    })
}
