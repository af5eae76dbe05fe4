// Metrics for sandbox operations.
//
// Tallies, a labeled tally, and a latency histogram covering:
// - Lifecycle transitions (build, runtime load, handler load, unload)
// - Handler call outcomes and durations
// - Snapshot/restore traffic
// - Monitor-driven terminations, labeled by the winning monitor's name

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Monotonic event count.
#[derive(Debug, Default)]
pub struct Tally(AtomicU64);

impl Tally {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tally with one dynamic label dimension.
///
/// Monitor names are open-ended (custom monitors pick their own), so the
/// per-label counts live behind a map instead of dedicated fields.
#[derive(Debug, Default)]
pub struct LabeledTally {
    values: Mutex<HashMap<&'static str, u64>>,
}

impl LabeledTally {
    pub fn bump(&self, label: &'static str) {
        if let Ok(mut values) = self.values.lock() {
            *values.entry(label).or_insert(0) += 1;
        }
    }

    pub fn total(&self, label: &str) -> u64 {
        self.values
            .lock()
            .ok()
            .and_then(|values| values.get(label).copied())
            .unwrap_or(0)
    }

    fn entries(&self) -> Vec<(&'static str, u64)> {
        let mut entries: Vec<_> = self
            .values
            .lock()
            .map(|values| values.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        entries.sort_by_key(|(label, _)| *label);
        entries
    }
}

/// Upper bucket bounds in microseconds, roughly a factor of four apart:
/// 500µs up to two minutes. Anything slower lands in the overflow slot.
const LATENCY_BOUNDS_MICROS: [u64; 10] = [
    500,
    2_000,
    8_000,
    32_000,
    125_000,
    500_000,
    2_000_000,
    8_000_000,
    30_000_000,
    120_000_000,
];

/// Call-latency histogram.
///
/// Each sample lands in exactly one slot (the slots are disjoint ranges,
/// not cumulative); the cumulative view Prometheus wants is computed at
/// export time, together with the `+Inf` bucket.
#[derive(Debug)]
pub struct LatencyHistogram {
    slots: [AtomicU64; LATENCY_BOUNDS_MICROS.len() + 1],
    sum_micros: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_micros: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
        let slot = LATENCY_BOUNDS_MICROS
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(LATENCY_BOUNDS_MICROS.len());
        self.slots[slot].fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn sum_micros(&self) -> u64 {
        self.sum_micros.load(Ordering::Relaxed)
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics registry for the sandbox.
#[derive(Debug, Default)]
pub struct SandboxMetrics {
    // Lifecycle tallies
    pub sandboxes_built: Tally,
    pub runtime_loads: Tally,
    pub handler_loads: Tally,
    pub sandbox_unloads: Tally,

    // Call tallies
    pub handler_calls: Tally,
    pub handler_call_failures: Tally,

    // Snapshot traffic
    pub snapshots_taken: Tally,
    pub snapshots_restored: Tally,

    // Terminations caused by an execution monitor, by monitor name
    pub monitor_terminations: LabeledTally,

    // Call latency
    pub call_duration: LatencyHistogram,
}

impl SandboxMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP event_handler_calls_total Total handler calls\n");
        output.push_str("# TYPE event_handler_calls_total counter\n");
        output.push_str(&format!(
            "event_handler_calls_total {}\n",
            self.handler_calls.total()
        ));

        output.push_str("# HELP event_handler_failures_total Failed handler calls\n");
        output.push_str("# TYPE event_handler_failures_total counter\n");
        output.push_str(&format!(
            "event_handler_failures_total {}\n",
            self.handler_call_failures.total()
        ));

        output.push_str("# HELP monitor_terminations_total Calls killed by a monitor\n");
        output.push_str("# TYPE monitor_terminations_total counter\n");
        for (label, count) in self.monitor_terminations.entries() {
            output.push_str(&format!(
                "monitor_terminations_total{{monitor_type=\"{label}\"}} {count}\n"
            ));
        }

        output.push_str("# HELP sandboxes_built_total Sandboxes built\n");
        output.push_str("# TYPE sandboxes_built_total counter\n");
        output.push_str(&format!(
            "sandboxes_built_total {}\n",
            self.sandboxes_built.total()
        ));

        output.push_str("# HELP runtime_loads_total Runtime bootstraps\n");
        output.push_str("# TYPE runtime_loads_total counter\n");
        output.push_str(&format!(
            "runtime_loads_total {}\n",
            self.runtime_loads.total()
        ));

        output.push_str("# HELP handler_loads_total Handler compilation passes\n");
        output.push_str("# TYPE handler_loads_total counter\n");
        output.push_str(&format!(
            "handler_loads_total {}\n",
            self.handler_loads.total()
        ));

        output.push_str("# HELP sandbox_unloads_total Unloads back to the runtime stage\n");
        output.push_str("# TYPE sandbox_unloads_total counter\n");
        output.push_str(&format!(
            "sandbox_unloads_total {}\n",
            self.sandbox_unloads.total()
        ));

        output.push_str("# HELP snapshots_total Snapshots taken\n");
        output.push_str("# TYPE snapshots_total counter\n");
        output.push_str(&format!(
            "snapshots_total {}\n",
            self.snapshots_taken.total()
        ));

        output.push_str("# HELP restores_total Snapshots restored\n");
        output.push_str("# TYPE restores_total counter\n");
        output.push_str(&format!(
            "restores_total {}\n",
            self.snapshots_restored.total()
        ));

        output.push_str("# HELP call_duration_seconds Handler call latency\n");
        output.push_str("# TYPE call_duration_seconds histogram\n");
        let mut cumulative = 0u64;
        for (i, &bound) in LATENCY_BOUNDS_MICROS.iter().enumerate() {
            cumulative += self.call_duration.slots[i].load(Ordering::Relaxed);
            output.push_str(&format!(
                "call_duration_seconds_bucket{{le=\"{}\"}} {cumulative}\n",
                bound as f64 / 1_000_000.0
            ));
        }
        output.push_str(&format!(
            "call_duration_seconds_bucket{{le=\"+Inf\"}} {}\n",
            self.call_duration.samples()
        ));
        output.push_str(&format!(
            "call_duration_seconds_sum {}\n",
            self.call_duration.sum_micros() as f64 / 1_000_000.0
        ));
        output.push_str(&format!(
            "call_duration_seconds_count {}\n",
            self.call_duration.samples()
        ));

        output
    }
}

/// Global metrics instance.
static METRICS: once_cell::sync::Lazy<Arc<SandboxMetrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(SandboxMetrics::new()));

/// Get the global metrics registry.
pub fn metrics() -> Arc<SandboxMetrics> {
    Arc::clone(&METRICS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally() {
        let tally = Tally::default();
        assert_eq!(tally.total(), 0);

        tally.bump();
        tally.bump();
        assert_eq!(tally.total(), 2);
    }

    #[test]
    fn test_labeled_tally() {
        let tally = LabeledTally::default();
        assert_eq!(tally.total("wall-clock"), 0);

        tally.bump("wall-clock");
        tally.bump("wall-clock");
        tally.bump("cpu-time");

        assert_eq!(tally.total("wall-clock"), 2);
        assert_eq!(tally.total("cpu-time"), 1);
        assert_eq!(tally.total("never-fired"), 0);
    }

    #[test]
    fn test_histogram_slots_are_disjoint() {
        let histogram = LatencyHistogram::new();

        histogram.record(Duration::from_micros(400)); // first slot
        histogram.record(Duration::from_millis(5)); // 8ms slot
        histogram.record(Duration::from_secs(600)); // overflow slot

        assert_eq!(histogram.samples(), 3);
        assert_eq!(histogram.sum_micros(), 400 + 5_000 + 600_000_000);
        assert_eq!(histogram.slots[0].load(Ordering::Relaxed), 1);
        assert_eq!(histogram.slots[2].load(Ordering::Relaxed), 1);
        assert_eq!(
            histogram.slots[LATENCY_BOUNDS_MICROS.len()].load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = SandboxMetrics::new();

        metrics.handler_calls.bump();
        metrics.monitor_terminations.bump("cpu-time");
        metrics.call_duration.record(Duration::from_millis(10));

        let output = metrics.export_prometheus();

        assert!(output.contains("event_handler_calls_total 1"));
        assert!(output.contains("monitor_terminations_total{monitor_type=\"cpu-time\"} 1"));
        assert!(output.contains("call_duration_seconds_bucket{le=\"+Inf\"} 1"));
        assert!(output.contains("call_duration_seconds_count 1"));
    }

    #[test]
    fn test_export_buckets_are_cumulative() {
        let metrics = SandboxMetrics::new();
        metrics.call_duration.record(Duration::from_micros(100));
        metrics.call_duration.record(Duration::from_millis(1));

        let output = metrics.export_prometheus();
        // Both samples sit at or below the 2ms bound, so every bucket from
        // there up reports 2.
        assert!(output.contains("call_duration_seconds_bucket{le=\"0.002\"} 2"));
        assert!(output.contains("call_duration_seconds_bucket{le=\"120\"} 2"));
    }

    #[test]
    fn test_global_metrics() {
        let metrics1 = metrics();
        let metrics2 = metrics();

        assert!(Arc::ptr_eq(&metrics1, &metrics2));
    }
}
