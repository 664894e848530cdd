use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cumulative execution time of one compiled plan node.
///
/// Every operator instance built from the node adds to the same counter, so
/// concurrent branches and repeated runs of a prepared plan all accumulate
/// here. The counter only ever grows.
#[derive(Debug)]
pub struct PlanTiming {
    nanos: AtomicU64,
    readonly: bool,
}

impl PlanTiming {
    pub fn new(readonly: bool) -> Self {
        Self {
            nanos: AtomicU64::new(0),
            readonly,
        }
    }

    /// Whether the node only reads data. Consulted by retry policies.
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn add_time(&self, t: Duration) {
        let nanos = u64::try_from(t.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates() {
        let timing = PlanTiming::new(true);
        assert!(timing.readonly());
        assert_eq!(timing.duration(), Duration::ZERO);

        timing.add_time(Duration::from_millis(3));
        timing.add_time(Duration::from_micros(500));
        assert_eq!(timing.duration(), Duration::from_micros(3500));
    }

    #[test]
    fn test_readwrite_flag() {
        assert!(!PlanTiming::new(false).readonly());
    }
}
