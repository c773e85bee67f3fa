//! Helpers shared by front ends that embed the session subsystem.
//!
//! SYSTEM CONTEXT
//! ==============
//! Utility modules keep presentation concerns such as navigation out of the
//! transport and state layers.

pub mod auth;
