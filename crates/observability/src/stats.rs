//! Windowed frame-interval statistics.

use std::time::Instant;

use tracing::info;

/// One emitted window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalSummary {
    pub samples: usize,
    pub mean_ms: f64,
    pub std_ms: f64,
}

impl IntervalSummary {
    /// Frame rate implied by the mean interval
    pub fn fps(&self) -> f64 {
        if self.mean_ms > 0.0 {
            1000.0 / self.mean_ms
        } else {
            0.0
        }
    }
}

/// Rolling window of inter-completion intervals
///
/// Collects `window` intervals, emits one summary, then starts over. Only the
/// running sums are kept.
#[derive(Debug, Clone)]
pub struct CaptureStatsCollector {
    window: usize,
    n: usize,
    sum: f64,
    sum_sq: f64,
    last: Option<Instant>,
}

impl CaptureStatsCollector {
    /// `window` is clamped to at least 2 so the sample variance is defined
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            n: 0,
            sum: 0.0,
            sum_sq: 0.0,
            last: None,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Samples collected in the current window
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Record a completion instant; the first call only arms the clock
    pub fn record(&mut self, now: Instant) -> Option<IntervalSummary> {
        let previous = self.last.replace(now)?;
        let interval_ms = now.saturating_duration_since(previous).as_secs_f64() * 1000.0;
        self.push_interval_ms(interval_ms)
    }

    /// Add one interval sample directly
    pub fn push_interval_ms(&mut self, interval_ms: f64) -> Option<IntervalSummary> {
        self.n += 1;
        self.sum += interval_ms;
        self.sum_sq += interval_ms * interval_ms;

        if self.n < self.window {
            return None;
        }

        let n = self.n as f64;
        let mean_ms = self.sum / n;
        let variance = ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0)).max(0.0);
        let summary = IntervalSummary {
            samples: self.n,
            mean_ms,
            std_ms: variance.sqrt(),
        };

        info!(
            samples = summary.samples,
            mean_ms = summary.mean_ms,
            std_ms = summary.std_ms,
            fps = summary.fps(),
            "frame interval window"
        );

        self.n = 0;
        self.sum = 0.0;
        self.sum_sq = 0.0;
        Some(summary)
    }

    /// Forget the clock and any partial window (session restart)
    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }
}
