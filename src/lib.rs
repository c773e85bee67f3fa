//! Session and capability-gating client for the AI image generation API.
//!
//! SYSTEM CONTEXT
//! ==============
//! Front ends (the `aigen` CLI, or an embedding UI) build one
//! [`net::transport::TransportGuard`] over an HTTP backend and a durable
//! [`storage::CredentialStore`], hand it to a [`state::session::SessionStore`],
//! and read identity and privilege through [`state::gate::CapabilityGate`]s.
//!
//! ERROR HANDLING
//! ==============
//! Nothing in the core is fatal. Login failures surface as
//! [`error::CredentialError`]; a session that cannot be established ends
//! logged out with [`error::SessionInvalidError`].

pub mod config;
pub mod error;
pub mod net;
pub mod state;
pub mod storage;
pub mod util;

#[cfg(test)]
mod test_helpers;
