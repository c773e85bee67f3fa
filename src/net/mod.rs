//! HTTP plumbing toward the generation API.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every request leaves the process through [`transport::TransportGuard`],
//! which attaches the stored credential and watches for authentication
//! failures. `api` wraps the individual `/auth/*` endpoints and `types`
//! holds their wire shapes.

pub mod api;
pub mod transport;
pub mod types;
