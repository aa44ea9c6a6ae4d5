//! # Pipeline Metrics
//!
//! Once per second the collector turns the pipeline counters into:
//!
//! | metric | meaning |
//! |--------|---------|
//! | RPS | records read from the ring buffer per second |
//! | PPS | records processed by the workers per second |
//! | EWP | events waiting for processing (read - processed - discarded) |
//! | LAT | mean in-probe handler duration (ns), plus its share of wall time since attach |
//!
//! Every sample is logged at `info` and kept, so `--metrics` can dump the
//! whole series as JSON on exit.

// Rates are display values
#![allow(clippy::cast_precision_loss)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;

/// Counters shared by the reader loop and the processing workers
#[derive(Debug, Default)]
pub struct PipelineCounters {
    read: AtomicU64,
    processed: AtomicU64,
    short_records: AtomicU64,
    dropped: AtomicU64,
    store_errors: AtomicU64,
    latency_sum_ns: AtomicU64,
    latency_count: AtomicU64,
}

impl PipelineCounters {
    pub fn record_read(&self) {
        self.read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_short(&self) {
        self.short_records.fetch_add(1, Ordering::Relaxed);
    }

    /// A decoded event the workers had no room for
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, handler_duration_ns: u32) {
        self.latency_sum_ns.fetch_add(u64::from(handler_duration_ns), Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of store failures so far, including this one
    pub fn record_store_error(&self) -> u64 {
        self.store_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[must_use]
    pub fn read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn short_records(&self) -> u64 {
        self.short_records.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn store_errors(&self) -> u64 {
        self.store_errors.load(Ordering::Relaxed)
    }

    /// Events read but not yet processed; short and dropped records never will be
    #[must_use]
    pub fn waiting(&self) -> u64 {
        self.read()
            .saturating_sub(self.short_records())
            .saturating_sub(self.dropped())
            .saturating_sub(self.processed())
    }

    #[must_use]
    pub fn mean_latency_ns(&self) -> Option<u64> {
        let count = self.latency_count.load(Ordering::Relaxed);
        (count > 0).then(|| self.latency_sum_ns.load(Ordering::Relaxed) / count)
    }

    #[must_use]
    pub fn latency_sum_ns(&self) -> u64 {
        self.latency_sum_ns.load(Ordering::Relaxed)
    }
}

/// One per-second sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricSample {
    pub rps: f64,
    pub pps: f64,
    pub ewp: u64,
    /// Change of EWP since the previous sample
    pub ewp_delta: i64,
    /// Mean handler duration, 0 before the first processed event
    pub lat_ns: u64,
    /// Handler time as a percentage of wall time since attach
    pub lat_share: f64,
}

/// The series written by `--metrics`
#[derive(Debug, Default, Serialize)]
pub struct MetricSeries {
    pub rps: Vec<f64>,
    pub pps: Vec<f64>,
    pub ewp: Vec<f64>,
    pub lat: Vec<f64>,
    /// Unix nanoseconds of each sample
    pub ts: Vec<f64>,
}

pub struct MetricsCollector {
    counters: Arc<PipelineCounters>,
    attached_at: Instant,
    last_sample: Instant,
    last_read: u64,
    last_processed: u64,
    last_ewp: u64,
    workers: u32,
    series: MetricSeries,
}

impl MetricsCollector {
    #[must_use]
    pub fn new(counters: Arc<PipelineCounters>, workers: u32) -> Self {
        let now = Instant::now();
        Self {
            counters,
            attached_at: now,
            last_sample: now,
            last_read: 0,
            last_processed: 0,
            last_ewp: 0,
            workers: workers.max(1),
            series: MetricSeries::default(),
        }
    }

    /// Take and log a sample; call about once per second
    pub fn sample(&mut self) -> MetricSample {
        let now = Instant::now();
        let secs = now.duration_since(self.last_sample).as_secs_f64().max(f64::EPSILON);
        self.last_sample = now;

        let read = self.counters.read();
        let processed = self.counters.processed();
        let rps = (read - self.last_read) as f64 / secs;
        let pps = (processed - self.last_processed) as f64 / secs;
        self.last_read = read;
        self.last_processed = processed;

        let ewp = self.counters.waiting();
        #[allow(clippy::cast_possible_wrap)]
        let ewp_delta = ewp as i64 - self.last_ewp as i64;
        self.last_ewp = ewp;

        let lat_ns = self.counters.mean_latency_ns().unwrap_or(0);
        let since_attach = now.duration_since(self.attached_at).as_nanos().max(1) as f64;
        let lat_share = self.counters.latency_sum_ns() as f64 / since_attach * 100.0;

        info!("[Stats] RPS: {rps:.2} ev/sec");
        info!("[Stats] PPS: {pps:.2} ev/sec ({:.2} ev/sec per worker)", pps / f64::from(self.workers));
        info!("[Stats] EWP: {ewp} ({ewp_delta:+})");
        if self.counters.mean_latency_ns().is_some() {
            info!("[Stats] LAT: {lat_ns} ns ({lat_share:.2}% of wall time)");
        } else {
            info!("[Stats] LAT: NaN");
        }

        let ts = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos()) as f64;
        self.series.rps.push(rps);
        self.series.pps.push(pps);
        self.series.ewp.push(ewp as f64);
        self.series.lat.push(lat_ns as f64);
        self.series.ts.push(ts);

        MetricSample { rps, pps, ewp, ewp_delta, lat_ns, lat_share }
    }

    #[must_use]
    pub fn series(&self) -> &MetricSeries {
        &self.series
    }

    /// Write the series as pretty JSON into `dir`
    ///
    /// # Errors
    /// Serialisation or file write failures
    pub fn write_json(&self, dir: &Path, suffix: Option<&str>) -> Result<PathBuf> {
        let unix_secs = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
        let path = dir.join(metrics_file_name(unix_secs, suffix));
        let data = serde_json::to_vec_pretty(&self.series).context("Failed to encode metrics")?;
        std::fs::write(&path, data)
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        Ok(path)
    }
}

/// `metrics_<unix-secs>[_<suffix>].json`
#[must_use]
pub fn metrics_file_name(unix_secs: u64, suffix: Option<&str>) -> String {
    match suffix.filter(|s| !s.is_empty()) {
        Some(suffix) => format!("metrics_{unix_secs}_{suffix}.json"),
        None => format!("metrics_{unix_secs}.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(metrics_file_name(1_700_000_000, None), "metrics_1700000000.json");
        assert_eq!(metrics_file_name(1_700_000_000, Some("")), "metrics_1700000000.json");
        assert_eq!(metrics_file_name(1_700_000_000, Some("run1")), "metrics_1700000000_run1.json");
    }

    #[test]
    fn test_waiting_and_latency() {
        let counters = PipelineCounters::default();
        assert_eq!(counters.mean_latency_ns(), None);
        for _ in 0..5 {
            counters.record_read();
        }
        counters.record_processed(100);
        counters.record_processed(300);
        assert_eq!(counters.waiting(), 3);
        assert_eq!(counters.mean_latency_ns(), Some(200));

        counters.record_short();
        counters.record_dropped();
        assert_eq!(counters.waiting(), 1);
    }

    #[test]
    fn test_sample_tracks_ewp_delta() {
        let counters = Arc::new(PipelineCounters::default());
        let mut collector = MetricsCollector::new(Arc::clone(&counters), 2);

        for _ in 0..4 {
            counters.record_read();
        }
        let first = collector.sample();
        assert_eq!((first.ewp, first.ewp_delta, first.lat_ns), (4, 4, 0));

        counters.record_processed(50);
        counters.record_processed(50);
        counters.record_processed(50);
        let second = collector.sample();
        assert_eq!((second.ewp, second.ewp_delta, second.lat_ns), (1, -3, 50));
        assert!(second.pps > 0.0);
        assert_eq!(collector.series().ewp, vec![4.0, 1.0]);
    }

    #[test]
    fn test_json_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = MetricsCollector::new(Arc::new(PipelineCounters::default()), 1);
        collector.sample();
        let path = collector.write_json(dir.path(), Some("test")).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("_test.json"));

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        for key in ["rps", "pps", "ewp", "lat", "ts"] {
            assert_eq!(value[key].as_array().unwrap().len(), 1, "{key}");
        }
    }
}
