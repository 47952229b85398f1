use std::time::{Duration, Instant};

/// Minimum time between two reconciliation passes
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

/// How often the background timer asks for a pass
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Guard against overlapping or too frequent reconciliation passes
///
/// Shared by the background timer and the on-demand path so that neither
/// can start a pass while one is running, or sooner than the debounce
/// window after the last one finished.
#[derive(Debug)]
pub struct ReconcileSchedule {
    debounce: Duration,
    in_flight: bool,
    last_finished: Option<Instant>,
}

impl ReconcileSchedule {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            in_flight: false,
            last_finished: None,
        }
    }

    /// Claim the next pass; returns false if one is running or is too recent
    pub fn try_begin(&mut self, now: Instant) -> bool {
        if self.in_flight {
            return false;
        }
        if let Some(last) = self.last_finished {
            if now.saturating_duration_since(last) < self.debounce {
                return false;
            }
        }

        self.in_flight = true;
        true
    }

    pub fn finish(&mut self, now: Instant) {
        self.in_flight = false;
        self.last_finished = Some(now);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_finished(&self) -> Option<Instant> {
        self.last_finished
    }
}

impl Default for ReconcileSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
