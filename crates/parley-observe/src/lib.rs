//! Observability setup for Parley binaries.
//!
//! Libraries in the workspace only emit `tracing` events; the subscriber is
//! installed here, once, by the binary.

pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
