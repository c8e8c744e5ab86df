//! Per-epoch progress reporting.
//!
//! A sink is purely observational: it receives `(epoch, max_epochs, metrics)`
//! once per completed epoch and cannot influence training.

/// Receiver for per-epoch training metrics.
pub trait ProgressSink {
    /// Called after epoch `epoch` (1-based) of at most `max_epochs`.
    fn on_epoch(&mut self, epoch: usize, max_epochs: usize, metrics: &[(&'static str, f64)]);
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_epoch(&mut self, _epoch: usize, _max_epochs: usize, _metrics: &[(&'static str, f64)]) {}
}

/// Emits one `tracing` info event per epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_epoch(&mut self, epoch: usize, max_epochs: usize, metrics: &[(&'static str, f64)]) {
        let rendered: Vec<String> = metrics.iter().map(|(name, v)| format!("{name}={v:.6}")).collect();
        tracing::info!(epoch, max_epochs, metrics = %rendered.join(" "), "baum-welch epoch");
    }
}

impl<F> ProgressSink for F
where
    F: FnMut(usize, usize, &[(&'static str, f64)]),
{
    fn on_epoch(&mut self, epoch: usize, max_epochs: usize, metrics: &[(&'static str, f64)]) {
        self(epoch, max_epochs, metrics)
    }
}
