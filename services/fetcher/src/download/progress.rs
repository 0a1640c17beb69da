use std::time::Duration;

use tokio::{sync::mpsc, time::Instant};

/// Throttled percentage reporter handed to a download strategy.
///
/// The first report always goes through; after that at most one per
/// `interval`. Values are clamped to `0..=100`.
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<f32>,
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::UnboundedSender<f32>, interval: Duration) -> Self {
        Self { tx, interval, last: None }
    }

    /// Returns whether the value was forwarded.
    pub fn report(&mut self, percent: f32) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last = Some(now);
        self.tx.send(percent.clamp(0.0, 100.0)).is_ok()
    }
}
