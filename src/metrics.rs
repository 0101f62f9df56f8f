//! Performance Aggregator: rolling-window latency/cost/success
//! tracking, percentile computation, EMA success rate, and a rule-based
//! alert engine that can disable a model through the Capability Registry.

use crate::capability::CapabilityRegistry;
use crate::config::AlertThresholds;
use crate::models::Model;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Rolling windows the aggregator maintains per model.
pub const WINDOWS: [Duration; 6] = [
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(6 * 60 * 60),
    Duration::from_secs(24 * 60 * 60),
];

const EMA_ALPHA: f64 = 0.1;
const MAX_SAMPLES: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct PerformanceMetric {
    pub model: Model,
    pub success: bool,
    pub total_time: Duration,
    pub cost: f64,
    pub severity: Option<Severity>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedMetrics {
    pub count: usize,
    pub success_rate: f64,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub avg_cost: f64,
}

fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Exponentially-weighted moving success rate per model, consulted by the
/// Router as the "observed success rate" confidence input.
pub struct SuccessRateTracker {
    rates: DashMap<Model, f64>,
}

impl SuccessRateTracker {
    pub fn new() -> Self {
        Self { rates: DashMap::new() }
    }

    pub fn rate(&self, model: Model) -> Option<f64> {
        self.rates.get(&model).map(|r| *r)
    }

    pub fn record(&self, model: Model, success: bool) {
        let observed = if success { 100.0 } else { 0.0 };
        self.rates
            .entry(model)
            .and_modify(|rate| *rate = EMA_ALPHA * observed + (1.0 - EMA_ALPHA) * *rate)
            .or_insert(observed);
    }
}

impl Default for SuccessRateTracker {
    fn default() -> Self {
        Self::new()
    }
}

struct AlertRule {
    name: &'static str,
    action_disable: bool,
    severity: AlertSeverity,
}

/// Success-rate floor is read from the configured [`AlertThresholds`]
/// rather than baked in here.
const DEFAULT_ALERT_RULES: &[AlertRule] =
    &[AlertRule { name: "success_rate_floor", action_disable: true, severity: AlertSeverity::High }];

const ALERT_EVAL_INTERVAL: Duration = Duration::from_secs(30);

/// Alert severity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A rule instance's lifecycle state. `resolved_at` is `None` while `firing`.
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub rule_id: &'static str,
    pub model: Model,
    pub severity: AlertSeverity,
    pub fired_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub measured: HashMap<&'static str, f64>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}

pub struct PerformanceAggregator {
    samples: DashMap<Model, RwLock<VecDeque<PerformanceMetric>>>,
    success_rates: Arc<SuccessRateTracker>,
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: Histogram,
    /// Currently-active (firing) alerts keyed by `(model, rule_id)`, so a
    /// rule whose condition keeps holding across evaluations stays the
    /// same `Alert` instead of re-firing.
    active_alerts: DashMap<(Model, &'static str), Alert>,
    thresholds: AlertThresholds,
}

impl PerformanceAggregator {
    pub fn new(success_rates: Arc<SuccessRateTracker>, thresholds: AlertThresholds) -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("llm_router_requests_total", "total completed requests by model and outcome"),
            &["model", "outcome"],
        )
        .expect("metric construction is infallible for static names");
        registry
            .register(Box::new(requests_total.clone()))
            .expect("single registration at construction time");

        let request_duration = Histogram::with_opts(HistogramOpts::new(
            "llm_router_request_duration_seconds",
            "completed request latency in seconds",
        ))
        .expect("metric construction is infallible for static names");
        registry
            .register(Box::new(request_duration.clone()))
            .expect("single registration at construction time");

        Self {
            samples: DashMap::new(),
            success_rates,
            registry,
            requests_total,
            request_duration,
            active_alerts: DashMap::new(),
            thresholds,
        }
    }

    /// Models with at least one recorded sample, for the alert-evaluation
    /// timer to iterate without the caller tracking a model roster itself.
    pub fn observed_models(&self) -> Vec<Model> {
        self.samples.iter().map(|entry| *entry.key()).collect()
    }

    /// Drops raw samples older than 24h, the retention window the
    /// minute-cadence aggregation job enforces.
    pub fn prune_expired(&self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::hours(24);
        for entry in self.samples.iter() {
            let mut series = entry.value().write();
            while series.front().is_some_and(|m| m.recorded_at < cutoff) {
                series.pop_front();
            }
        }
    }

    /// Records one completed attempt.
    pub fn record(&self, metric: PerformanceMetric) {
        let outcome = if metric.success { "success" } else { "failure" };
        self.requests_total.with_label_values(&[metric.model.as_str(), outcome]).inc();
        self.request_duration.observe(metric.total_time.as_secs_f64());
        self.success_rates.record(metric.model, metric.success);

        let mut bucket = self.samples.entry(metric.model).or_insert_with(|| RwLock::new(VecDeque::new()));
        let mut series = bucket.write();
        series.push_back(metric);
        while series.len() > MAX_SAMPLES {
            series.pop_front();
        }
    }

    /// Aggregates samples for `model` within `window` of `now`.
    pub fn aggregate(&self, model: Model, window: Duration, now: DateTime<Utc>) -> AggregatedMetrics {
        let Some(bucket) = self.samples.get(&model) else {
            return AggregatedMetrics::default();
        };
        let series = bucket.read();
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());

        let in_window: Vec<&PerformanceMetric> = series.iter().filter(|m| m.recorded_at >= cutoff).collect();
        if in_window.is_empty() {
            return AggregatedMetrics::default();
        }

        let mut durations: Vec<Duration> = in_window.iter().map(|m| m.total_time).collect();
        durations.sort();

        let successes = in_window.iter().filter(|m| m.success).count();
        let avg_cost = in_window.iter().map(|m| m.cost).sum::<f64>() / in_window.len() as f64;

        AggregatedMetrics {
            count: in_window.len(),
            success_rate: successes as f64 / in_window.len() as f64 * 100.0,
            p50: percentile(&durations, 0.50),
            p95: percentile(&durations, 0.95),
            p99: percentile(&durations, 0.99),
            avg_cost,
        }
    }

    /// Transitions `(model, rule_id)` into `firing` if it wasn't already
    /// active, leaving the existing `Alert` (and its `fired_at`) untouched
    /// if it was, so re-evaluating an already-firing rule doesn't reset it.
    fn fire(&self, model: Model, rule_id: &'static str, severity: AlertSeverity, now: DateTime<Utc>, measured: HashMap<&'static str, f64>) -> Alert {
        self.active_alerts
            .entry((model, rule_id))
            .or_insert_with(|| Alert { id: Uuid::new_v4(), rule_id, model, severity, fired_at: now, resolved_at: None, measured })
            .clone()
    }

    /// Transitions `(model, rule_id)` into `resolved` if it was active.
    /// A no-op if the rule wasn't firing, so resolving twice is safe.
    fn resolve(&self, model: Model, rule_id: &'static str, now: DateTime<Utc>) {
        if let Some(mut entry) = self.active_alerts.get_mut(&(model, rule_id)) {
            if entry.resolved_at.is_none() {
                entry.resolved_at = Some(now);
            }
        }
    }

    /// Evaluates alert rules and advances each rule's `inactive -> firing
    /// -> resolved` state machine, returning every alert touched by this
    /// evaluation (active or freshly resolved). Two conditions fire
    /// immediately regardless of the 30s cadence: a
    /// `Severity::Critical` sample, or any single attempt whose
    /// `total_time` exceeds 30s.
    pub fn evaluate_alerts(&self, model: Model, registry: &CapabilityRegistry, now: DateTime<Utc>) -> Vec<Alert> {
        let mut touched = Vec::new();

        let mut critical_latest = false;
        let mut slow_latest = false;
        if let Some(bucket) = self.samples.get(&model) {
            let series = bucket.read();
            if let Some(latest) = series.back() {
                critical_latest = matches!(latest.severity, Some(Severity::Critical));
                slow_latest = latest.total_time > self.thresholds.max_single_attempt_time;
            }
        }

        if critical_latest {
            touched.push(self.fire(model, "critical_error", AlertSeverity::Critical, now, HashMap::new()));
        } else {
            self.resolve(model, "critical_error", now);
        }

        if slow_latest {
            touched.push(self.fire(model, "slow_attempt", AlertSeverity::Medium, now, HashMap::new()));
        } else {
            self.resolve(model, "slow_attempt", now);
        }

        let window = self.aggregate(model, Duration::from_secs(5 * 60), now);
        if window.count >= 5 {
            for rule in DEFAULT_ALERT_RULES {
                let mut measured = HashMap::new();
                measured.insert("success_rate", window.success_rate);
                if window.success_rate < self.thresholds.min_success_rate {
                    touched.push(self.fire(model, rule.name, rule.severity, now, measured));
                    if rule.action_disable {
                        registry.set_enabled(model, false);
                    }
                } else {
                    self.resolve(model, rule.name, now);
                }
            }
        }

        touched
    }

    /// Currently-firing alerts across every model/rule combination.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active_alerts.iter().filter(|entry| entry.value().is_active()).map(|entry| entry.value().clone()).collect()
    }

    pub fn alert_cadence() -> Duration {
        ALERT_EVAL_INTERVAL
    }

    /// Prometheus text exposition format.
    pub fn gather(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(model: Model, success: bool, secs: u64, at: DateTime<Utc>) -> PerformanceMetric {
        PerformanceMetric {
            model,
            success,
            total_time: Duration::from_secs(secs),
            cost: 0.001,
            severity: None,
            recorded_at: at,
        }
    }

    #[test]
    fn aggregate_computes_percentiles_and_success_rate() {
        let aggregator = PerformanceAggregator::new(Arc::new(SuccessRateTracker::new()), AlertThresholds::default());
        let now = Utc::now();
        for (i, secs) in [1, 2, 3, 4, 5].into_iter().enumerate() {
            aggregator.record(sample(Model::Mistral7B, i % 2 == 0, secs, now));
        }
        let agg = aggregator.aggregate(Model::Mistral7B, Duration::from_secs(3600), now);
        assert_eq!(agg.count, 5);
        assert!(agg.p50 >= Duration::from_secs(1));
        assert!((agg.success_rate - 60.0).abs() < 1.0);
    }

    #[test]
    fn alert_disables_model_below_threshold() {
        let aggregator = PerformanceAggregator::new(Arc::new(SuccessRateTracker::new()), AlertThresholds::default());
        let registry = CapabilityRegistry::new();
        let now = Utc::now();
        for _ in 0..6 {
            aggregator.record(sample(Model::Llama70B, false, 1, now));
        }
        assert!(registry.is_enabled(Model::Llama70B));
        let fired = aggregator.evaluate_alerts(Model::Llama70B, &registry, now);
        assert!(!fired.is_empty());
        assert!(!registry.is_enabled(Model::Llama70B));
    }

    #[test]
    fn single_slow_attempt_fires_immediately() {
        let aggregator = PerformanceAggregator::new(Arc::new(SuccessRateTracker::new()), AlertThresholds::default());
        let registry = CapabilityRegistry::new();
        let now = Utc::now();
        aggregator.record(sample(Model::Gpt4o, true, 31, now));
        let fired = aggregator.evaluate_alerts(Model::Gpt4o, &registry, now);
        assert!(fired.iter().any(|a| a.rule_id == "slow_attempt"));
    }

    #[test]
    fn alert_idempotence_one_active_alert_without_resolve() {
        let aggregator = PerformanceAggregator::new(Arc::new(SuccessRateTracker::new()), AlertThresholds::default());
        let registry = CapabilityRegistry::new();
        let now = Utc::now();
        aggregator.record(sample(Model::Gpt4o, true, 31, now));
        let first = aggregator.evaluate_alerts(Model::Gpt4o, &registry, now);
        let second = aggregator.evaluate_alerts(Model::Gpt4o, &registry, now);
        let first_id = first.iter().find(|a| a.rule_id == "slow_attempt").unwrap().id;
        let second_id = second.iter().find(|a| a.rule_id == "slow_attempt").unwrap().id;
        assert_eq!(first_id, second_id);
        assert_eq!(aggregator.active_alerts().iter().filter(|a| a.rule_id == "slow_attempt").count(), 1);
    }

    #[test]
    fn alert_resolves_once_condition_clears() {
        let aggregator = PerformanceAggregator::new(Arc::new(SuccessRateTracker::new()), AlertThresholds::default());
        let registry = CapabilityRegistry::new();
        let now = Utc::now();
        aggregator.record(sample(Model::Gpt4o, true, 31, now));
        aggregator.evaluate_alerts(Model::Gpt4o, &registry, now);
        aggregator.record(sample(Model::Gpt4o, true, 1, now));
        aggregator.evaluate_alerts(Model::Gpt4o, &registry, now);
        assert!(aggregator.active_alerts().iter().all(|a| a.rule_id != "slow_attempt"));
    }

    #[test]
    fn success_rate_tracker_is_ema() {
        let tracker = SuccessRateTracker::new();
        tracker.record(Model::Mistral7B, true);
        let after_one = tracker.rate(Model::Mistral7B).unwrap();
        assert_eq!(after_one, 100.0);
        tracker.record(Model::Mistral7B, false);
        let after_two = tracker.rate(Model::Mistral7B).unwrap();
        assert!(after_two < after_one);
    }
}
