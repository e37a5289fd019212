//! Caller-facing session entry points.

pub mod service;

pub use service::{SessionOutcome, SessionService, build_response};
