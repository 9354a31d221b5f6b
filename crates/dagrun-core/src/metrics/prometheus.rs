//! Prometheus-backed metrics recorder.

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::time::Duration;

use super::MetricsRecorder;

/// Reports engine metrics through Prometheus primitives.
pub struct PrometheusRecorder {
    invocations: CounterVec,
    durations: HistogramVec,
    retries: CounterVec,
    circuit_open: CounterVec,
}

impl PrometheusRecorder {
    /// Creates the collectors and registers them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let invocations = CounterVec::new(
            Opts::new(
                "dagrun_invocations_total",
                "Total number of agent invocations by status",
            ),
            &["agent_id", "status"],
        )?;
        let durations = HistogramVec::new(
            HistogramOpts::new(
                "dagrun_invocation_duration_seconds",
                "Agent invocation latency in seconds",
            ),
            &["agent_id"],
        )?;
        let retries = CounterVec::new(
            Opts::new(
                "dagrun_retry_attempts_total",
                "Total retry attempts by agent",
            ),
            &["agent_id"],
        )?;
        let circuit_open = CounterVec::new(
            Opts::new(
                "dagrun_circuit_breaks_total",
                "Total circuit breaker open events by agent",
            ),
            &["agent_id"],
        )?;

        registry.register(Box::new(invocations.clone()))?;
        registry.register(Box::new(durations.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(circuit_open.clone()))?;

        Ok(Self {
            invocations,
            durations,
            retries,
            circuit_open,
        })
    }
}

impl MetricsRecorder for PrometheusRecorder {
    fn observe_invocation(&self, agent_id: &str, status: &str, duration: Duration) {
        self.invocations
            .with_label_values(&[agent_id, status])
            .inc();
        self.durations
            .with_label_values(&[agent_id])
            .observe(duration.as_secs_f64());
    }

    fn observe_retry(&self, agent_id: &str) {
        self.retries.with_label_values(&[agent_id]).inc();
    }

    fn observe_circuit_open(&self, agent_id: &str) {
        self.circuit_open.with_label_values(&[agent_id]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{STATUS_ERROR, STATUS_SUCCESS};

    #[test]
    fn observations_show_up_in_gather() {
        let registry = Registry::new();
        let recorder = PrometheusRecorder::new(&registry).unwrap();

        recorder.observe_invocation("echo", STATUS_SUCCESS, Duration::from_millis(12));
        recorder.observe_invocation("echo", STATUS_ERROR, Duration::from_millis(3));
        recorder.observe_retry("echo");
        recorder.observe_circuit_open("echo");

        let families: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(families.contains(&"dagrun_invocations_total".to_string()));
        assert!(families.contains(&"dagrun_invocation_duration_seconds".to_string()));
        assert!(families.contains(&"dagrun_retry_attempts_total".to_string()));
        assert!(families.contains(&"dagrun_circuit_breaks_total".to_string()));
    }

    #[test]
    fn double_registration_is_an_error() {
        let registry = Registry::new();
        let _first = PrometheusRecorder::new(&registry).unwrap();
        assert!(PrometheusRecorder::new(&registry).is_err());
    }
}
