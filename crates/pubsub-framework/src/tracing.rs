//! # Tracing Setup
//!
//! Structured logging for the relay. Every event carries the fields it is
//! about (`actor`, `topic`, `handler`) rather than formatting them into the
//! message, so `RUST_LOG=pubsub_framework=debug` shows each subscription
//! transition and `trace` adds per-message traffic.

/// Install a compact `fmt` subscriber filtered by `RUST_LOG`.
///
/// Call once at process start. Later calls are ignored.
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}
