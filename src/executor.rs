//! Fallback Executor: walks the router's primary+fallback
//! chain, enforcing a per-model circuit breaker, per-attempt timeout,
//! exponential backoff with jitter, and hard budget/time ceilings.
//!
//! The per-model breaker tracks consecutive failures and opens for a
//! recovery window once a threshold is crossed, the same shape as a
//! retry loop keyed on provider health rather than a global breaker.

use crate::clock::{Clock, Sleeper};
use crate::config::FallbackConfig;
use crate::error::{ErrorCategory, RouterError};
use crate::health::HealthMonitor;
use crate::metrics::{PerformanceAggregator, PerformanceMetric, Severity};
use crate::models::{Message, Model, ProviderResponse, TaskContext};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

const RATE_LIMIT_SLEEP_CAP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

pub struct FallbackExecutor {
    health: Arc<HealthMonitor>,
    config: FallbackConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    aggregator: Arc<PerformanceAggregator>,
    breakers: DashMap<Model, Mutex<BreakerState>>,
}

pub struct ExecutionOutcome {
    pub response: ProviderResponse,
    pub model: Model,
    pub cost: f64,
    pub fallback_used: bool,
    pub retry_count: u32,
}

impl FallbackExecutor {
    pub fn new(
        health: Arc<HealthMonitor>,
        config: FallbackConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        aggregator: Arc<PerformanceAggregator>,
    ) -> Self {
        Self {
            health,
            config,
            clock,
            sleeper,
            aggregator,
            breakers: DashMap::new(),
        }
    }

    fn breaker_allows(&self, model: Model) -> bool {
        let entry = self.breakers.entry(model).or_insert_with(|| Mutex::new(BreakerState::default()));
        let state = entry.lock();
        match state.opened_at {
            None => true,
            Some(opened_at) => {
                let elapsed = self.clock.now().signed_duration_since(opened_at);
                elapsed >= chrono::Duration::from_std(self.config.recovery_timeout).unwrap_or(chrono::Duration::zero())
            }
        }
    }

    fn record_success(&self, model: Model) {
        let entry = self.breakers.entry(model).or_insert_with(|| Mutex::new(BreakerState::default()));
        let mut state = entry.lock();
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    fn record_failure(&self, model: Model) {
        let entry = self.breakers.entry(model).or_insert_with(|| Mutex::new(BreakerState::default()));
        let mut state = entry.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.config.failure_threshold && state.opened_at.is_none() {
            state.opened_at = Some(self.clock.now());
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.config.base_backoff.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let jitter = rand::thread_rng().gen_range(0..=(exp / 4).max(1));
        Duration::from_millis(exp.saturating_add(jitter)).min(self.config.max_backoff)
    }

    /// Walks `candidates` (primary first) against `messages`, applying
    /// the retry/breaker policy. `deadline` and `budget` are the hard
    /// ceilings from `TaskContext`.
    pub async fn execute(
        &self,
        candidates: &[Model],
        messages: &[Message],
        ctx: &TaskContext,
        estimated_cost_per_model: impl Fn(Model) -> f64,
    ) -> Result<ExecutionOutcome, RouterError> {
        let start = self.clock.now();
        let deadline = ctx.time_limit;
        let mut retry_count = 0u32;
        let mut last_error: Option<RouterError> = None;

        for (idx, &model) in candidates.iter().enumerate() {
            if let Some(limit) = deadline {
                let elapsed = self.clock.now().signed_duration_since(start);
                if elapsed >= chrono::Duration::from_std(limit).unwrap_or(chrono::Duration::zero()) {
                    return Err(RouterError::Timeout(limit.as_secs()));
                }
            }

            let cost = estimated_cost_per_model(model);
            if let Some(budget) = ctx.budget_limit {
                if cost > budget {
                    last_error = Some(RouterError::CostExceeded { estimated: cost, limit: budget });
                    continue;
                }
            }

            if !self.breaker_allows(model) {
                last_error = Some(RouterError::ServiceUnavailable(format!("{model}: circuit breaker open")));
                continue;
            }

            if !self.health.is_model_healthy(model) {
                last_error = Some(RouterError::ServiceUnavailable(format!("{model}: unhealthy")));
                continue;
            }

            let Some(handle) = self.health.provider_for_model(model) else {
                last_error = Some(RouterError::NotFound(model.to_string()));
                continue;
            };

            let mut attempt = 0u32;
            loop {
                // Bound this attempt by whichever is tighter: the provider's
                // configured timeout, or what's left of the task deadline.
                let attempt_timeout = match deadline {
                    Some(limit) => {
                        let elapsed = (self.clock.now() - start).to_std().unwrap_or(Duration::ZERO);
                        limit.saturating_sub(elapsed).min(handle.timeout)
                    }
                    None => handle.timeout,
                };

                let attempt_start = self.clock.now();
                let call = handle.client.complete(model, messages);
                let outcome = tokio::time::timeout(attempt_timeout, call).await;

                let result = match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(RouterError::Timeout(attempt_timeout.as_secs())),
                };

                let total_time = (self.clock.now() - attempt_start)
                    .to_std()
                    .unwrap_or(Duration::ZERO);

                match result {
                    Ok(response) => {
                        self.record_success(model);
                        self.aggregator.record(PerformanceMetric {
                            model,
                            success: true,
                            total_time,
                            cost,
                            severity: None,
                            recorded_at: self.clock.now(),
                        });
                        return Ok(ExecutionOutcome {
                            response,
                            model,
                            cost,
                            fallback_used: idx > 0,
                            retry_count,
                        });
                    }
                    Err(err) => {
                        let severity = if err.category() == ErrorCategory::ServerError { Some(Severity::Critical) } else { None };
                        self.aggregator.record(PerformanceMetric {
                            model,
                            success: false,
                            total_time,
                            cost,
                            severity,
                            recorded_at: self.clock.now(),
                        });

                        // The task deadline just ran out inside this attempt:
                        // abort the whole chain rather than trying a fallback.
                        if let Some(limit) = deadline {
                            let elapsed = (self.clock.now() - start).to_std().unwrap_or(Duration::ZERO);
                            if elapsed >= limit {
                                self.record_failure(model);
                                return Err(RouterError::Timeout(limit.as_secs()));
                            }
                        }

                        if let RouterError::RateLimit { retry_after_secs, .. } = &err {
                            if attempt + 1 >= self.config.max_retry_attempts {
                                self.record_failure(model);
                                last_error = Some(err);
                                break;
                            }
                            let sleep_for = Duration::from_secs(*retry_after_secs).min(RATE_LIMIT_SLEEP_CAP);
                            self.sleeper.sleep(sleep_for).await;
                            attempt += 1;
                            retry_count += 1;
                            last_error = Some(err);
                            continue;
                        }

                        if err.retryable() && attempt + 1 < self.config.max_retry_attempts {
                            self.sleeper.sleep(self.backoff(attempt)).await;
                            attempt += 1;
                            retry_count += 1;
                            last_error = Some(err);
                            continue;
                        }

                        self.record_failure(model);
                        last_error = Some(err);
                        break;
                    }
                }
            }
        }

        Err(RouterError::ChainExhausted(
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "no candidates attempted".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::AlertThresholds;
    use crate::health::{HealthMonitor, ProviderHandle};
    use crate::metrics::SuccessRateTracker;
    use crate::models::{FinishReason, MessageRole, Usage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct ScriptedProvider {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl crate::providers::ProviderClient for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _model: Model, _messages: &[Message]) -> Result<ProviderResponse, RouterError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(RouterError::ServerError("boom".to_string()))
            } else {
                Ok(ProviderResponse {
                    content: "ok".to_string(),
                    usage: Usage::default(),
                    finish_reason: FinishReason::Stop,
                })
            }
        }

        async fn ping(&self) -> bool {
            true
        }
    }

    fn messages() -> Vec<Message> {
        vec![Message { role: MessageRole::User, content: "hi".to_string() }]
    }

    fn test_executor(provider: Arc<ScriptedProvider>, model: Model) -> FallbackExecutor {
        let handle = Arc::new(ProviderHandle::new("scripted", provider, vec![model]));
        let health = Arc::new(HealthMonitor::new(vec![handle], Duration::from_secs(60)));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        FallbackExecutor::new(
            health,
            FallbackConfig {
                max_retry_attempts: 3,
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(10),
            },
            clock.clone(),
            clock,
            Arc::new(PerformanceAggregator::new(Arc::new(SuccessRateTracker::new()), AlertThresholds::default())),
        )
    }

    #[tokio::test]
    async fn succeeds_immediately_when_provider_healthy() {
        let provider = Arc::new(ScriptedProvider { calls: AtomicU32::new(0), fail_times: 0 });
        let executor = test_executor(provider, Model::Mistral7B);
        let ctx = TaskContext::new(
            crate::models::TaskType::GeneralQuery,
            crate::models::Complexity::Low,
            crate::models::Priority::Medium,
            crate::models::UserTier::Free,
        );
        let outcome = executor
            .execute(&[Model::Mistral7B], &messages(), &ctx, |_| 0.001)
            .await
            .unwrap();
        assert_eq!(outcome.retry_count, 0);
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn retries_then_succeeds_on_transient_failure() {
        let provider = Arc::new(ScriptedProvider { calls: AtomicU32::new(0), fail_times: 2 });
        let executor = test_executor(provider, Model::Mistral7B);
        let ctx = TaskContext::new(
            crate::models::TaskType::GeneralQuery,
            crate::models::Complexity::Low,
            crate::models::Priority::Medium,
            crate::models::UserTier::Free,
        );
        let outcome = executor
            .execute(&[Model::Mistral7B], &messages(), &ctx, |_| 0.001)
            .await
            .unwrap();
        assert_eq!(outcome.retry_count, 2);
    }

    #[tokio::test]
    async fn budget_ceiling_is_hard() {
        let provider = Arc::new(ScriptedProvider { calls: AtomicU32::new(0), fail_times: 0 });
        let executor = test_executor(provider, Model::Mistral7B);
        let ctx = TaskContext::new(
            crate::models::TaskType::GeneralQuery,
            crate::models::Complexity::Low,
            crate::models::Priority::Medium,
            crate::models::UserTier::Free,
        )
        .with_budget_limit(0.0001);
        let result = executor.execute(&[Model::Mistral7B], &messages(), &ctx, |_| 1.0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_skips_candidate() {
        let provider = Arc::new(ScriptedProvider { calls: AtomicU32::new(0), fail_times: 100 });
        let executor = test_executor(provider, Model::Mistral7B);
        let ctx = TaskContext::new(
            crate::models::TaskType::GeneralQuery,
            crate::models::Complexity::Low,
            crate::models::Priority::Medium,
            crate::models::UserTier::Free,
        );
        for _ in 0..2 {
            let _ = executor.execute(&[Model::Mistral7B], &messages(), &ctx, |_| 0.001).await;
        }
        assert!(executor.breakers.get(&Model::Mistral7B).unwrap().lock().consecutive_failures >= 2);
    }
}
