//! Client-side session state.
//!
//! DESIGN
//! ======
//! `session` is the only writer of credential, profile and privilege state;
//! `gate` is a read-only consumer that turns a state snapshot into what a
//! guarded view may render.

pub mod gate;
pub mod session;
