use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// How often progress is logged, in completed cells.
pub const DEFAULT_REPORT_INTERVAL: usize = 25;

/// Remaining-time estimate for a raster pass.
///
/// Purely informational: nothing in the pass reads the estimate.
#[derive(Debug)]
pub struct ProgressTracker {
    pass: &'static str,
    total: usize,
    done: usize,
    started: Instant,
    report_interval: usize,
}

impl ProgressTracker {
    pub fn new(pass: &'static str, total: usize) -> Self {
        Self {
            pass,
            total,
            done: 0,
            started: Instant::now(),
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    pub fn with_report_interval(mut self, interval: usize) -> Self {
        self.report_interval = interval.max(1);
        self
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Mark one more cell done, logging every `report_interval` cells and at
    /// the end.
    pub fn advance(&mut self) {
        self.done += 1;
        if self.done % self.report_interval == 0 || self.done == self.total {
            let eta_secs = self.eta().map(|d| d.as_secs()).unwrap_or(0);
            info!(
                pass = self.pass,
                done = self.done,
                total = self.total,
                eta_secs,
                "Raster progress"
            );
        }
    }

    /// Average time per cell so far times the cells left.
    pub fn eta(&self) -> Option<Duration> {
        if self.done == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.done) as u32;
        let per_cell = self.elapsed() / self.done as u32;
        Some(per_cell * remaining)
    }
}
