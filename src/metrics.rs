//! Reconciler metrics (feature `metrics`)
//!
//! A small `prometheus-client` registry tracking reconcile outcomes, phase
//! transitions, and how many mutating AWS calls the update planner has
//! issued. Scraped over the optional REST surface's `/metrics` route.

use once_cell::sync::Lazy;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct PhaseLabel {
    pub phase: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct OutcomeLabel {
    pub outcome: String,
}

pub struct Metrics {
    pub reconciles: Family<OutcomeLabel, Counter>,
    pub phase_transitions: Family<PhaseLabel, Counter>,
    pub mutating_calls: Counter,
}

impl Metrics {
    fn new(registry: &mut Registry) -> Self {
        let reconciles = Family::default();
        registry.register(
            "eks_operator_reconciles",
            "Reconcile attempts by outcome (success, retry, failure)",
            reconciles.clone(),
        );

        let phase_transitions = Family::default();
        registry.register(
            "eks_operator_phase_transitions",
            "Number of times a ClusterConfig entered a given phase",
            phase_transitions.clone(),
        );

        let mutating_calls = Counter::default();
        registry.register(
            "eks_operator_mutating_calls",
            "Mutating AWS calls issued by the update planner",
            mutating_calls.clone(),
        );

        Self {
            reconciles,
            phase_transitions,
            mutating_calls,
        }
    }
}

static REGISTRY: Lazy<(Registry, Metrics)> = Lazy::new(|| {
    let mut registry = Registry::default();
    let metrics = Metrics::new(&mut registry);
    (registry, metrics)
});

pub fn metrics() -> &'static Metrics {
    &REGISTRY.1
}

/// Render the registry in Prometheus text exposition format.
pub fn encode_text() -> String {
    let mut buf = String::new();
    encode(&mut buf, &REGISTRY.0).expect("prometheus encoding is infallible for this registry");
    buf
}

pub fn record_reconcile(outcome: &str) {
    metrics()
        .reconciles
        .get_or_create(&OutcomeLabel {
            outcome: outcome.to_string(),
        })
        .inc();
}

pub fn record_phase(phase: &str) {
    metrics()
        .phase_transitions
        .get_or_create(&PhaseLabel {
            phase: phase.to_string(),
        })
        .inc();
}

pub fn record_mutating_call() {
    metrics().mutating_calls.inc();
}
