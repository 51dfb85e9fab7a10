//! Per-component context instrumentation (spec.md §4.3 "Per-component
//! instrumentation") and the context-timeline file (spec.md §6).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::util::atomic_write_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurePoint {
    IterationStart,
    AfterPrompt,
    AfterSkills,
    AfterTools,
    AfterResponse,
}

/// `< 60%`, `60-85%`, `> 85%` of the active context limit (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthBand {
    Healthy,
    Elevated,
    Critical,
}

impl HealthBand {
    pub fn for_percent(percent_of_limit: f64) -> Self {
        if percent_of_limit > 85.0 {
            HealthBand::Critical
        } else if percent_of_limit >= 60.0 {
            HealthBand::Elevated
        } else {
            HealthBand::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMeasurement {
    pub iteration: u32,
    pub measure_point: MeasurePoint,
    pub tokens: u64,
    pub percent_of_limit: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimelineSummary {
    pub total_measurements: u64,
    pub iterations_tracked: u64,
    pub peak_tokens: u64,
    pub peak_usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTimeline {
    pub summary: TimelineSummary,
    pub measurements: Vec<ContextMeasurement>,
}

/// Append-only in-memory timeline, flushed to
/// `<agent-dir>/metrics/context-timeline.json` every iteration.
pub struct ContextTracker {
    path: PathBuf,
    measurements: Vec<ContextMeasurement>,
    iterations_seen: std::collections::HashSet<u32>,
}

impl ContextTracker {
    pub fn new(agent_dir: &Path) -> Self {
        Self {
            path: agent_dir.join("metrics").join("context-timeline.json"),
            measurements: Vec::new(),
            iterations_seen: std::collections::HashSet::new(),
        }
    }

    pub fn record(&mut self, iteration: u32, measure_point: MeasurePoint, tokens: u64, context_limit: u64) {
        let percent_of_limit = if context_limit == 0 {
            0.0
        } else {
            (tokens as f64 / context_limit as f64) * 100.0
        };
        debug!(iteration, ?measure_point, tokens, percent_of_limit, "ContextTracker::record: called");
        self.iterations_seen.insert(iteration);
        self.measurements.push(ContextMeasurement {
            iteration,
            measure_point,
            tokens,
            percent_of_limit,
            timestamp: Utc::now(),
        });
    }

    pub fn health_band(&self, percent_of_limit: f64) -> HealthBand {
        HealthBand::for_percent(percent_of_limit)
    }

    pub fn summary(&self) -> TimelineSummary {
        let peak_tokens = self.measurements.iter().map(|m| m.tokens).max().unwrap_or(0);
        let peak_usage_percent = self
            .measurements
            .iter()
            .map(|m| m.percent_of_limit)
            .fold(0.0_f64, f64::max);

        TimelineSummary {
            total_measurements: self.measurements.len() as u64,
            iterations_tracked: self.iterations_seen.len() as u64,
            peak_tokens,
            peak_usage_percent,
        }
    }

    pub fn flush(&self) -> std::io::Result<()> {
        let timeline = ContextTimeline {
            summary: self.summary(),
            measurements: self.measurements.clone(),
        };
        atomic_write_json(&self.path, &timeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_bands_match_spec_thresholds() {
        assert_eq!(HealthBand::for_percent(10.0), HealthBand::Healthy);
        assert_eq!(HealthBand::for_percent(60.0), HealthBand::Elevated);
        assert_eq!(HealthBand::for_percent(84.9), HealthBand::Elevated);
        assert_eq!(HealthBand::for_percent(85.1), HealthBand::Critical);
    }

    #[test]
    fn summary_tracks_peaks_and_distinct_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ContextTracker::new(dir.path());
        tracker.record(1, MeasurePoint::IterationStart, 100, 1000);
        tracker.record(1, MeasurePoint::AfterPrompt, 400, 1000);
        tracker.record(2, MeasurePoint::IterationStart, 50, 1000);

        let summary = tracker.summary();
        assert_eq!(summary.total_measurements, 3);
        assert_eq!(summary.iterations_tracked, 2);
        assert_eq!(summary.peak_tokens, 400);
        assert!((summary.peak_usage_percent - 40.0).abs() < 1e-9);
    }

    #[test]
    fn flush_writes_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ContextTracker::new(dir.path());
        tracker.record(1, MeasurePoint::IterationStart, 100, 1000);
        tracker.flush().unwrap();

        let path = dir.path().join("metrics").join("context-timeline.json");
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("\"total_measurements\""));
    }
}
