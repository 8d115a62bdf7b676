//! Observability for Keygate: Prometheus metrics.
//!
//! Logging uses `tracing` directly with `keygate.*` targets; see `main.rs` for
//! subscriber setup.

pub mod metrics;
