//! Metrics - mutable counter bag updated by the engine, read by the context
//! tracker and summary printer (spec.md §3).

use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub iterations_attempted: u32,
    pub iterations_completed: u32,
    pub successes: u32,
    pub failures: u32,
    pub rollback_count: u32,
    #[serde(skip)]
    pub start_time: Option<Instant>,
    #[serde(skip)]
    pub last_response_time: Option<Instant>,
    pub duration_seconds: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            iterations_attempted: 0,
            iterations_completed: 0,
            successes: 0,
            failures: 0,
            rollback_count: 0,
            start_time: None,
            last_response_time: None,
            duration_seconds: 0.0,
        }
    }
}

impl Metrics {
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    pub fn record_attempt(&mut self) {
        self.iterations_attempted += 1;
    }

    pub fn record_success(&mut self) {
        self.iterations_completed += 1;
        self.successes += 1;
        self.last_response_time = Some(Instant::now());
        self.refresh_duration();
    }

    pub fn record_failure(&mut self) {
        self.iterations_completed += 1;
        self.failures += 1;
        self.last_response_time = Some(Instant::now());
        self.refresh_duration();
    }

    pub fn record_rollback(&mut self) {
        self.rollback_count += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn refresh_duration(&mut self) {
        self.duration_seconds = self.elapsed().as_secs_f64();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterations_attempted_is_monotonic() {
        let mut m = Metrics::default();
        for i in 1..=5 {
            m.record_attempt();
            assert_eq!(m.iterations_attempted, i);
        }
    }

    #[test]
    fn success_and_failure_both_count_as_completed() {
        let mut m = Metrics::default();
        m.record_success();
        m.record_failure();
        assert_eq!(m.iterations_completed, 2);
        assert_eq!(m.successes, 1);
        assert_eq!(m.failures, 1);
    }
}
