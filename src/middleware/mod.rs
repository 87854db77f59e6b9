//! HTTP middleware stack: bearer-session auth, CORS, request tracing.

pub mod auth;
pub mod cors;
pub mod trace;
