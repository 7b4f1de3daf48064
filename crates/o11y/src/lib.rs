//! Observability bootstrap: tracing subscriber setup and a panic hook.
//!
//! Hosts embedding the engine call [`logging::init`] once at startup. The
//! engine itself only emits `tracing` events and `metrics` counters; it
//! never installs an exporter.

pub mod logging;
pub mod panic;
