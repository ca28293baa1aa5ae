use std::sync::atomic::{AtomicU64, Ordering};

/// Timings of one metrics report tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportCycle {
    pub collect_duration_micros: u64,
    pub transmit_duration_micros: u64,
    pub round_trip_latency_millis: u64,
    pub payload_byte_length: usize,
}

/// Timings carried from one cycle into the next payload.
///
/// The payload for cycle N reports what was measured during cycle N-1, so
/// these are written by the tick and by the async delivery task.
#[derive(Debug, Default)]
pub struct CycleTimings {
    collect_micros: AtomicU64,
    report_micros: AtomicU64,
    latency_millis: AtomicU64,
}

impl CycleTimings {
    pub fn record_cycle(&self, cycle: &ReportCycle) {
        self.collect_micros
            .store(cycle.collect_duration_micros, Ordering::Relaxed);
        self.report_micros
            .store(cycle.transmit_duration_micros, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_millis: u64) {
        self.latency_millis.store(latency_millis, Ordering::Relaxed);
    }

    pub fn collect_micros(&self) -> u64 {
        self.collect_micros.load(Ordering::Relaxed)
    }

    pub fn report_micros(&self) -> u64 {
        self.report_micros.load(Ordering::Relaxed)
    }

    pub fn latency_millis(&self) -> u64 {
        self.latency_millis.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timings_start_at_zero() {
        let timings = CycleTimings::default();
        assert_eq!(timings.collect_micros(), 0);
        assert_eq!(timings.report_micros(), 0);
        assert_eq!(timings.latency_millis(), 0);
    }

    #[test]
    fn test_timings_carry_previous_cycle() {
        let timings = CycleTimings::default();
        timings.record_cycle(&ReportCycle {
            collect_duration_micros: 120,
            transmit_duration_micros: 45,
            round_trip_latency_millis: 0,
            payload_byte_length: 512,
        });
        timings.record_latency(33);

        assert_eq!(timings.collect_micros(), 120);
        assert_eq!(timings.report_micros(), 45);
        assert_eq!(timings.latency_millis(), 33);
    }
}
