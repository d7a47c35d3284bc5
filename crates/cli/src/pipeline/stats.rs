//! Run summary.

use std::time::Duration;

use device::LedgerReport;
use dispatcher::PipelineReport;

/// Outcome of each shutter press
#[derive(Debug, Clone, Copy, Default)]
pub struct ShotCounts {
    pub accepted: u32,
    /// Pressed while no pair was retained or the session was not Active
    pub not_ready: u32,
    pub failed: u32,
}

/// Statistics from an exerciser run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Session reached the ready state
    pub ready: bool,
    pub interrupted: bool,
    pub shots: ShotCounts,
    pub report: PipelineReport,
    pub ledger: LedgerReport,
    pub duration: Duration,
}

impl RunSummary {
    /// Final images per second of run time
    pub fn images_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.report.summary.final_images as f64 / secs
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                      Capture Run Summary                     ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Ready: {}", if self.ready { "yes" } else { "no" });
        if self.interrupted {
            println!("   ├─ Interrupted: yes");
        }
        println!(
            "   ├─ Shots: accepted={} not_ready={} failed={}",
            self.shots.accepted, self.shots.not_ready, self.shots.failed
        );
        println!("   ├─ Final images: {} ({:.2}/s)", self.report.summary.final_images, self.images_per_sec());
        println!("   └─ Final state: {}", self.report.final_state);

        println!("\n📈 Pipeline");
        for line in self.report.to_string().lines() {
            println!("   {line}");
        }

        println!("\n🧾 Buffer Ledger");
        println!("   {}", self.ledger);
        if self.ledger.is_balanced() {
            println!("   ✓ every buffer returned exactly once");
        } else {
            println!("   ✗ ledger unbalanced");
        }

        println!();
    }
}
