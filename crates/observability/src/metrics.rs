//! Capture pipeline metrics
//!
//! Thin recorders over the `metrics` facade plus an in-memory aggregator
//! used for end-of-run summaries.

use contracts::{RequestKind, SessionState};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

use crate::stats::IntervalSummary;

/// Register help text for every exported series
pub fn describe_all() {
    describe_counter!("zsl_pairs_formed_total", "Metadata/buffer pairs formed");
    describe_counter!(
        "zsl_pairs_evicted_total",
        "Retained pairs evicted over capacity and released"
    );
    describe_counter!("zsl_buffers_released_total", "Buffers returned to the device");
    describe_gauge!("zsl_pending_metadata", "Metadata records waiting for a buffer");
    describe_gauge!("zsl_pending_buffers", "Buffers waiting for a metadata record");
    describe_counter!("zsl_session_transitions_total", "Session state transitions by target state");
    describe_counter!("zsl_reprocess_submitted_total", "Reprocess requests accepted by the device");
    describe_counter!("zsl_reprocess_completed_total", "Reprocess requests completed");
    describe_counter!("zsl_reprocess_failed_total", "Reprocess requests rejected or failed");
    describe_counter!("zsl_capture_failures_total", "Per-frame capture failures by request kind");
    describe_counter!("zsl_buffers_lost_total", "Buffers the device reported lost");
    describe_histogram!(
        "zsl_capture_latency_ms",
        Unit::Milliseconds,
        "Still/reprocess latency by phase"
    );
    describe_gauge!("zsl_frame_interval_ms_mean", Unit::Milliseconds, "Windowed preview frame interval mean");
    describe_gauge!("zsl_frame_interval_ms_std", Unit::Milliseconds, "Windowed preview frame interval std");
    describe_counter!("zsl_final_images_total", "Final images handed to sinks by outcome");
}

/// A pair was formed by the pairing queue
pub fn record_pair_formed() {
    counter!("zsl_pairs_formed_total").increment(1);
}

/// The oldest retained pair was evicted over capacity
pub fn record_pair_evicted() {
    counter!("zsl_pairs_evicted_total").increment(1);
}

/// A buffer was returned to the device
pub fn record_buffer_released(count: u64) {
    counter!("zsl_buffers_released_total").increment(count);
}

/// Pending (unjoined) depth of each side of the pairing queue
pub fn record_pending_depths(metadata: usize, buffers: usize) {
    gauge!("zsl_pending_metadata").set(metadata as f64);
    gauge!("zsl_pending_buffers").set(buffers as f64);
}

pub fn record_session_transition(to: SessionState) {
    counter!("zsl_session_transitions_total", "to" => to.as_str()).increment(1);
}

pub fn record_reprocess_submitted() {
    counter!("zsl_reprocess_submitted_total").increment(1);
}

pub fn record_reprocess_completed() {
    counter!("zsl_reprocess_completed_total").increment(1);
}

pub fn record_reprocess_failed() {
    counter!("zsl_reprocess_failed_total").increment(1);
}

pub fn record_capture_failure(kind: RequestKind) {
    counter!("zsl_capture_failures_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_buffer_lost(kind: RequestKind) {
    counter!("zsl_buffers_lost_total", "kind" => kind.as_str()).increment(1);
}

/// Request latency, `phase` is `submit_to_start` or `start_to_complete`
pub fn record_capture_latency_ms(kind: RequestKind, phase: &'static str, latency_ms: f64) {
    histogram!(
        "zsl_capture_latency_ms",
        "kind" => kind.as_str(),
        "phase" => phase
    )
    .record(latency_ms);
}

/// Windowed frame-interval statistics
pub fn record_frame_interval(summary: &IntervalSummary) {
    gauge!("zsl_frame_interval_ms_mean").set(summary.mean_ms);
    gauge!("zsl_frame_interval_ms_std").set(summary.std_ms);
}

/// Final image delivery per sink
pub fn record_final_image(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "zsl_final_images_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// In-memory capture aggregator
///
/// Mirrors the exported counters so a run can print a summary without a
/// metrics backend.
#[derive(Debug, Clone, Default)]
pub struct CaptureMetricsAggregator {
    pub pairs_formed: u64,
    pub pairs_evicted: u64,
    pub reprocess_submitted: u64,
    pub reprocess_completed: u64,
    pub reprocess_failed: u64,
    pub stills_submitted: u64,
    pub capture_failures: u64,
    pub buffers_lost: u64,
    pub late_callbacks: u64,
    pub final_images: u64,
    pub submit_to_start_ms: RunningStats,
    pub start_to_complete_ms: RunningStats,
    pub frame_interval_ms: RunningStats,
}

impl CaptureMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one emitted interval window into the run statistics
    pub fn update_interval(&mut self, summary: &IntervalSummary) {
        self.frame_interval_ms.push(summary.mean_ms);
    }

    pub fn summary(&self) -> CaptureSummary {
        let finished = self.reprocess_completed + self.reprocess_failed;
        CaptureSummary {
            pairs_formed: self.pairs_formed,
            pairs_evicted: self.pairs_evicted,
            reprocess_submitted: self.reprocess_submitted,
            reprocess_completed: self.reprocess_completed,
            reprocess_failed: self.reprocess_failed,
            stills_submitted: self.stills_submitted,
            capture_failures: self.capture_failures,
            buffers_lost: self.buffers_lost,
            late_callbacks: self.late_callbacks,
            final_images: self.final_images,
            reprocess_success_rate: if finished > 0 {
                self.reprocess_completed as f64 / finished as f64 * 100.0
            } else {
                0.0
            },
            submit_to_start_ms: StatsSummary::from(&self.submit_to_start_ms),
            start_to_complete_ms: StatsSummary::from(&self.start_to_complete_ms),
            frame_interval_ms: StatsSummary::from(&self.frame_interval_ms),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Capture run summary
#[derive(Debug, Clone, Default)]
pub struct CaptureSummary {
    pub pairs_formed: u64,
    pub pairs_evicted: u64,
    pub reprocess_submitted: u64,
    pub reprocess_completed: u64,
    pub reprocess_failed: u64,
    pub stills_submitted: u64,
    pub capture_failures: u64,
    pub buffers_lost: u64,
    pub late_callbacks: u64,
    pub final_images: u64,
    pub reprocess_success_rate: f64,
    pub submit_to_start_ms: StatsSummary,
    pub start_to_complete_ms: StatsSummary,
    pub frame_interval_ms: StatsSummary,
}

impl std::fmt::Display for CaptureSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Capture Summary ===")?;
        writeln!(
            f,
            "Pairs: formed={} evicted={}",
            self.pairs_formed, self.pairs_evicted
        )?;
        writeln!(
            f,
            "Reprocess: submitted={} completed={} failed={} ({:.1}% ok)",
            self.reprocess_submitted,
            self.reprocess_completed,
            self.reprocess_failed,
            self.reprocess_success_rate
        )?;
        writeln!(f, "Still captures: {}", self.stills_submitted)?;
        writeln!(
            f,
            "Frame failures: {} / buffers lost: {} / late callbacks: {}",
            self.capture_failures, self.buffers_lost, self.late_callbacks
        )?;
        writeln!(f, "Final images: {}", self.final_images)?;
        writeln!(f, "Submit->start (ms): {}", self.submit_to_start_ms)?;
        writeln!(f, "Start->complete (ms): {}", self.start_to_complete_ms)?;
        writeln!(f, "Frame interval mean (ms): {}", self.frame_interval_ms)?;
        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for value in [4.0, 8.0, 6.0, 2.0] {
            stats.push(value);
        }

        assert_eq!(stats.count(), 4);
        assert!((stats.mean() - 5.0).abs() < 1e-10);
        assert!((stats.min() - 2.0).abs() < 1e-10);
        assert!((stats.max() - 8.0).abs() < 1e-10);
        assert!((stats.variance() - 20.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_success_rate() {
        let mut aggregator = CaptureMetricsAggregator::new();
        aggregator.reprocess_submitted = 4;
        aggregator.reprocess_completed = 3;
        aggregator.reprocess_failed = 1;
        aggregator.start_to_complete_ms.push(12.0);

        let summary = aggregator.summary();
        assert!((summary.reprocess_success_rate - 75.0).abs() < 1e-10);
        assert_eq!(summary.start_to_complete_ms.count, 1);

        let text = summary.to_string();
        assert!(text.contains("completed=3"));
        assert!(text.contains("Frame interval mean (ms): N/A"));

        aggregator.reset();
        assert_eq!(aggregator.summary().reprocess_submitted, 0);
    }

    #[test]
    fn test_recorders_without_backend() {
        // No recorder installed: calls must be no-ops
        record_pair_formed();
        record_session_transition(SessionState::Active);
        record_capture_latency_ms(RequestKind::Reprocess, "start_to_complete", 4.2);
        record_final_image("log", true);
    }
}
