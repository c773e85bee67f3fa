//! Capability Gate: derives what a guarded view may show from session state.
//!
//! SYSTEM CONTEXT
//! ==============
//! Privileged views wrap their content in a gate built from
//! [`super::session::SessionStore::gate`]. The gate only reads session state;
//! it makes no network calls and has no failure modes of its own.
//!
//! DESIGN
//! ======
//! [`GateView::evaluate`] is a pure function of one [`SessionState`] snapshot.
//! [`CapabilityGate`] pairs it with a `watch` receiver so callers can await
//! the next distinct view instead of polling.

#[cfg(test)]
#[path = "gate_test.rs"]
mod gate_test;

use tokio::sync::watch;

use super::session::SessionState;

pub const LOGIN_ROUTE: &str = "/login";
pub const DASHBOARD_ROUTE: &str = "/dashboard";

pub const ACCESS_DENIED_TITLE: &str = "Access Denied";
pub const UNAUTHENTICATED_MESSAGE: &str = "You must be logged in to access this page.";
pub const UNAUTHORIZED_MESSAGE: &str = "You don't have administrator privileges to access this page.";

/// What a guarded view demands of the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// Any signed-in account with a fetched profile.
    Authenticated,
    /// A signed-in account with the privilege flag set.
    Admin,
}

/// Rendered outcome of a gate for one session snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateView {
    /// Session still rehydrating or refreshing; show a neutral indicator.
    Pending,
    Unauthenticated,
    Unauthorized,
    Authorized,
}

impl GateView {
    #[must_use]
    pub fn evaluate(state: &SessionState, requirement: Requirement) -> Self {
        if state.loading {
            return Self::Pending;
        }
        if state.profile.is_none() {
            return Self::Unauthenticated;
        }
        match requirement {
            Requirement::Authenticated => Self::Authorized,
            Requirement::Admin if state.is_admin() => Self::Authorized,
            Requirement::Admin => Self::Unauthorized,
        }
    }

    #[must_use]
    pub fn is_authorized(self) -> bool {
        self == Self::Authorized
    }

    /// Heading for the access-denied views.
    #[must_use]
    pub fn title(self) -> Option<&'static str> {
        match self {
            Self::Unauthenticated | Self::Unauthorized => Some(ACCESS_DENIED_TITLE),
            Self::Pending | Self::Authorized => None,
        }
    }

    #[must_use]
    pub fn message(self) -> Option<&'static str> {
        match self {
            Self::Unauthenticated => Some(UNAUTHENTICATED_MESSAGE),
            Self::Unauthorized => Some(UNAUTHORIZED_MESSAGE),
            Self::Pending | Self::Authorized => None,
        }
    }

    /// Where the denied view links to: sign-in for anonymous visitors, the
    /// ordinary dashboard for signed-in accounts without the privilege.
    #[must_use]
    pub fn redirect_path(self) -> Option<&'static str> {
        match self {
            Self::Unauthenticated => Some(LOGIN_ROUTE),
            Self::Unauthorized => Some(DASHBOARD_ROUTE),
            Self::Pending | Self::Authorized => None,
        }
    }
}

/// A live gate over a session store's state.
pub struct CapabilityGate {
    requirement: Requirement,
    rx: watch::Receiver<SessionState>,
    last: GateView,
}

impl CapabilityGate {
    #[must_use]
    pub fn new(mut rx: watch::Receiver<SessionState>, requirement: Requirement) -> Self {
        let last = GateView::evaluate(&rx.borrow_and_update(), requirement);
        Self { requirement, rx, last }
    }

    #[must_use]
    pub fn requirement(&self) -> Requirement {
        self.requirement
    }

    /// View for the state as it is right now.
    #[must_use]
    pub fn current(&self) -> GateView {
        GateView::evaluate(&self.rx.borrow(), self.requirement)
    }

    /// Wait for a state change that produces a different view. Returns `None`
    /// once the session store is gone.
    pub async fn next_view(&mut self) -> Option<GateView> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            let view = GateView::evaluate(&self.rx.borrow_and_update(), self.requirement);
            if view != self.last {
                tracing::debug!(requirement = ?self.requirement, from = ?self.last, to = ?view, "gate view changed");
                self.last = view;
                return Some(view);
            }
        }
    }

    /// Run `content` against the current state if the gate is open.
    ///
    /// `content` runs while the state is borrowed; it must not block.
    ///
    /// # Errors
    ///
    /// Returns the non-authorized [`GateView`] to render instead.
    pub fn render<T>(&self, content: impl FnOnce(&SessionState) -> T) -> Result<T, GateView> {
        let state = self.rx.borrow();
        match GateView::evaluate(&state, self.requirement) {
            GateView::Authorized => Ok(content(&state)),
            view => Err(view),
        }
    }
}
