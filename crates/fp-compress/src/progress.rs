//! Progress reporting.
//!
//! A [`ProgressSender`] is the caller's sink. A [`ProgressTracker`] sits in
//! front of it for the duration of one job: each orchestrator pass is mapped
//! onto the part of the 0-100 range not yet reported, so a failed pass
//! followed by a fallback never makes the reported value go backwards.

use std::sync::Arc;

use parking_lot::Mutex;

/// Sender for progress reports.
///
/// Wraps a callback that receives a percentage (0.0 -- 100.0) and a short
/// description of the current step.
pub struct ProgressSender {
    callback: Box<dyn Fn(f64, &str) + Send + Sync>,
}

impl ProgressSender {
    /// Create a new sender from the given callback.
    pub fn new(callback: impl Fn(f64, &str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Create a no-op sender that discards all progress reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_, _| {}),
        }
    }

    /// Report progress.
    pub fn send(&self, progress: f64, step: &str) {
        (self.callback)(progress, step);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackerState {
    base: f64,
    span: f64,
    last: f64,
}

/// Monotonic view over a [`ProgressSender`] for one job.
#[derive(Debug)]
pub struct ProgressTracker {
    sender: Arc<ProgressSender>,
    state: Mutex<TrackerState>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(Arc::new(ProgressSender::noop()))
    }
}

impl ProgressTracker {
    pub fn new(sender: Arc<ProgressSender>) -> Self {
        Self {
            sender,
            state: Mutex::new(TrackerState {
                base: 0.0,
                span: 100.0,
                last: 0.0,
            }),
        }
    }

    /// Start a new pass covering whatever remains above the last report.
    pub fn begin_pass(&self, step: &str) {
        let mut state = self.state.lock();
        state.base = state.last;
        state.span = 100.0 - state.last;
        tracing::trace!(base = state.base, step, "progress pass");
    }

    /// Report `percent` (0-100) of the current pass.
    ///
    /// Values that would not advance past the last report are dropped.
    pub fn report(&self, percent: f64, step: &str) {
        let value = {
            let mut state = self.state.lock();
            let pct = if percent.is_finite() {
                percent.clamp(0.0, 100.0)
            } else {
                0.0
            };
            let value = (state.base + state.span * pct / 100.0).min(100.0);
            if value <= state.last {
                return;
            }
            state.last = value;
            value
        };
        self.sender.send(value, step);
    }

    /// Report completion: always exactly 100.
    pub fn finish(&self, step: &str) {
        self.state.lock().last = 100.0;
        self.sender.send(100.0, step);
    }

    /// The last value sent.
    pub fn last(&self) -> f64 {
        self.state.lock().last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (Arc<Mutex<Vec<f64>>>, Arc<ProgressSender>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sender = ProgressSender::new(move |pct, _| sink.lock().push(pct));
        (seen, Arc::new(sender))
    }

    #[test]
    fn sender_invokes_callback() {
        let (seen, sender) = recording();
        sender.send(42.0, "step");
        assert_eq!(*seen.lock(), vec![42.0]);
        ProgressSender::noop().send(1.0, "ignored");
    }

    #[test]
    fn single_pass_maps_directly() {
        let (seen, sender) = recording();
        let tracker = ProgressTracker::new(sender);
        tracker.begin_pass("native");
        tracker.report(25.0, "frame");
        tracker.report(50.0, "frame");
        tracker.finish("done");
        assert_eq!(*seen.lock(), vec![25.0, 50.0, 100.0]);
    }

    #[test]
    fn fallback_pass_is_rebased() {
        let (seen, sender) = recording();
        let tracker = ProgressTracker::new(sender);
        tracker.begin_pass("native");
        tracker.report(60.0, "frame");
        // Native pass fails; fallback restarts at 0% of its own work.
        tracker.begin_pass("best");
        tracker.report(0.0, "frame");
        tracker.report(50.0, "frame");
        tracker.report(100.0, "frame");
        tracker.finish("done");

        let values = seen.lock().clone();
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
        assert_eq!(values[1], 80.0);
        assert_eq!(*values.last().unwrap(), 100.0);
    }

    #[test]
    fn regressions_are_dropped() {
        let (seen, sender) = recording();
        let tracker = ProgressTracker::new(sender);
        tracker.report(40.0, "a");
        tracker.report(10.0, "b");
        tracker.report(f64::NAN, "c");
        assert_eq!(*seen.lock(), vec![40.0]);
        assert_eq!(tracker.last(), 40.0);
    }
}
