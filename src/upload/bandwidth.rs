use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use super::constants::{EXTRA_CAPACITY_RATIO, MIN_BANDWIDTH_ELAPSED, MIN_BANDWIDTH_SAMPLES};

/// Decides whether a transfer is on pace to finish within its deadline.
///
/// Progress ticks arrive from the transport while the request is in flight,
/// so the sample counter is atomic and every method takes `&self`.
#[derive(Debug)]
pub struct BandwidthVerifier {
    timeout: Duration,
    total_bytes: u64,
    started: Instant,
    samples: AtomicU32,
}

impl BandwidthVerifier {
    pub fn new(timeout: Duration, total_bytes: u64) -> Self {
        Self {
            timeout,
            total_bytes,
            started: Instant::now(),
            samples: AtomicU32::new(0),
        }
    }

    /// `false` once the observed rate can no longer finish the remaining
    /// bytes before the deadline.
    pub fn has_remaining_capacity(&self, completed_bytes: u64) -> bool {
        self.has_remaining_capacity_after(completed_bytes, self.started.elapsed())
    }

    /// `true` when the whole transfer took at most half of what the deadline allowed.
    pub fn had_extra_capacity(&self) -> bool {
        self.had_extra_capacity_after(self.started.elapsed())
    }

    pub(crate) fn has_remaining_capacity_after(&self, completed_bytes: u64, elapsed: Duration) -> bool {
        let samples = self.samples.fetch_add(1, Ordering::Relaxed) + 1;

        match self.required_to_current_ratio(samples, completed_bytes, elapsed) {
            Some(ratio) => ratio <= 1.0,
            None => true,
        }
    }

    pub(crate) fn had_extra_capacity_after(&self, elapsed: Duration) -> bool {
        let samples = self.samples.fetch_add(1, Ordering::Relaxed) + 1;

        if elapsed >= self.timeout || !self.is_eligible(samples, self.total_bytes, elapsed) {
            return false;
        }

        // 整体所需速率 / 实际速率, 即 elapsed / timeout
        let elapsed = elapsed.as_secs_f64();
        if elapsed <= 0.0 {
            return true;
        }
        let required_rate = self.total_bytes as f64 / self.timeout.as_secs_f64();
        let current_rate = self.total_bytes as f64 / elapsed;

        required_rate / current_rate <= EXTRA_CAPACITY_RATIO
    }

    fn is_eligible(&self, samples: u32, completed_bytes: u64, elapsed: Duration) -> bool {
        completed_bytes >= self.total_bytes
            || (samples >= MIN_BANDWIDTH_SAMPLES && elapsed >= MIN_BANDWIDTH_ELAPSED)
    }

    fn required_to_current_ratio(&self, samples: u32, completed_bytes: u64, elapsed: Duration) -> Option<f64> {
        if !self.is_eligible(samples, completed_bytes, elapsed) {
            return None;
        }

        let remaining_duration = self.timeout.checked_sub(elapsed)?.as_secs_f64();
        if remaining_duration <= 0.0 {
            return None;
        }

        let remaining_bytes = self.total_bytes.saturating_sub(completed_bytes) as f64;
        if remaining_bytes == 0.0 {
            return Some(0.0);
        }

        let elapsed = elapsed.as_secs_f64();
        if completed_bytes == 0 || elapsed <= 0.0 {
            // nothing moved yet: infinitely slow
            return Some(f64::INFINITY);
        }

        let required_rate = remaining_bytes / remaining_duration;
        let current_rate = completed_bytes as f64 / elapsed;

        Some(required_rate / current_rate)
    }
}
