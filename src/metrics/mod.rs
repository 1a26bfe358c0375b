//! Latency metrics rendered in Prometheus text format.
//!
//! Tracks one counter (`client_requests_total`), per-method response
//! summaries, and per-method latency histograms. The struct is owned by the
//! application root and injected into everything that observes latencies;
//! there is no process-wide singleton.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use parking_lot::Mutex;

/// Histogram upper bounds in seconds, matching the default Prometheus
/// client buckets.
const HISTOGRAM_BOUNDS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

#[derive(Default)]
struct HistogramSeries {
    buckets: Vec<u64>,
    count: u64,
    sum: f64,
}

#[derive(Default)]
struct SummarySeries {
    count: u64,
    sum: f64,
}

#[derive(Default)]
struct MetricsInner {
    request_total: u64,
    histograms: BTreeMap<String, HistogramSeries>,
    summaries: BTreeMap<String, SummarySeries>,
}

/// Shared metrics collector.
///
/// Methods observed by the gateway: `transcribe`, `synthesize`, `generate`
/// (reply-token latency) and `play_queue` (end-to-end synth-to-enqueue).
#[derive(Default)]
pub struct Metrics {
    inner: Mutex<MetricsInner>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one control-plane request.
    pub fn increment_request(&self) {
        self.inner.lock().request_total += 1;
    }

    /// Record a latency observation into the per-method histogram.
    pub fn observe_response_time(&self, method: &str, seconds: f64) {
        let mut inner = self.inner.lock();
        let series = inner.histograms.entry(method.to_string()).or_default();
        if series.buckets.is_empty() {
            series.buckets = vec![0; HISTOGRAM_BOUNDS.len() + 1];
        }
        series.count += 1;
        series.sum += seconds;
        for (i, bound) in HISTOGRAM_BOUNDS.iter().enumerate() {
            if seconds <= *bound {
                series.buckets[i] += 1;
            }
        }
        let last = series.buckets.len() - 1;
        series.buckets[last] += 1;
    }

    /// Record a latency observation into the per-method summary.
    pub fn observe_response_summary(&self, method: &str, seconds: f64) {
        let mut inner = self.inner.lock();
        let series = inner.summaries.entry(method.to_string()).or_default();
        series.count += 1;
        series.sum += seconds;
    }

    /// Render everything in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();

        out.push_str("# HELP client_requests_total Total number of client requests\n");
        out.push_str("# TYPE client_requests_total counter\n");
        let _ = writeln!(out, "client_requests_total {}", inner.request_total);

        out.push_str("# HELP client_response_summary Time elapsed for response\n");
        out.push_str("# TYPE client_response_summary summary\n");
        for (method, series) in &inner.summaries {
            let _ = writeln!(
                out,
                "client_response_summary_count{{method=\"{}\"}} {}",
                method, series.count
            );
            let _ = writeln!(
                out,
                "client_response_summary_sum{{method=\"{}\"}} {:.6}",
                method, series.sum
            );
        }

        out.push_str("# HELP response_time_milliseconds Response time in milliseconds\n");
        out.push_str("# TYPE response_time_milliseconds histogram\n");
        for (method, series) in &inner.histograms {
            for (i, bound) in HISTOGRAM_BOUNDS.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "response_time_milliseconds_bucket{{method=\"{}\",le=\"{}\"}} {}",
                    method, bound, series.buckets[i]
                );
            }
            let _ = writeln!(
                out,
                "response_time_milliseconds_bucket{{method=\"{}\",le=\"+Inf\"}} {}",
                method,
                series.buckets[series.buckets.len() - 1]
            );
            let _ = writeln!(
                out,
                "response_time_milliseconds_count{{method=\"{}\"}} {}",
                method, series.count
            );
            let _ = writeln!(
                out,
                "response_time_milliseconds_sum{{method=\"{}\"}} {:.6}",
                method, series.sum
            );
        }

        out
    }
}
