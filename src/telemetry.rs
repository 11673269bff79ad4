//! Stage progress reporting.
//!
//! The sink is passed explicitly through the call chain rather than attached
//! via wrapping, so every stage report is visible at its call site. The
//! surrounding service layer decides where reports go; this crate ships a
//! `tracing`-backed sink and tests use a collecting one.

/// Consumer of timestamped stage reports.
pub trait ProgressSink: Send + Sync {
    /// Report that `stage` is at `percent` completion with a human-readable
    /// message.
    fn report(&self, stage: &str, percent: u8, message: &str);
}

/// Sink that emits each report as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn report(&self, stage: &str, percent: u8, message: &str) {
        tracing::info!(stage, percent, "{message}");
    }
}

/// Sink that discards all reports.
#[derive(Debug, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _stage: &str, _percent: u8, _message: &str) {}
}
