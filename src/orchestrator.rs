//! Orchestrator: the DI root. Wires Classifier, Router,
//! Fallback Executor, Context Store, and Performance Aggregator behind
//! two entry points, `complete` and `chat_with_context`.
//!
//! Construction takes concrete collaborators rather than reaching for a
//! static singleton: no `OnceLock<Orchestrator>` anywhere in this crate,
//! callers just hold an `Arc<Orchestrator>`.

use crate::capability::CapabilityRegistry;
use crate::classifier::{ClassificationResult, ClassifierContext, IntentClassifier};
use crate::clock::Clock;
use crate::context::ContextStore;
use crate::error::RouterError;
use crate::executor::FallbackExecutor;
use crate::health::HealthMonitor;
use crate::metrics::PerformanceAggregator;
use crate::models::{Complexity, LLMRequest, LLMResponse, Message, MessageRole, TaskContext};
use crate::response_generator::{GeneratedReply, ResponseGenerator};
use crate::router::Router;
use chrono::Timelike;
use std::sync::Arc;
use std::time::Duration;

/// Confidence assigned to a canned apology when the Response Generator
/// itself fails — it must not break a chat turn.
const GENERATOR_FAILURE_CONFIDENCE: f32 = 0.3;

fn is_business_hours(now: chrono::DateTime<chrono::Utc>) -> bool {
    (9..18).contains(&now.hour())
}

/// Bundle returned from [`Orchestrator::chat_with_context`].
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub response: GeneratedReply,
    pub intent: ClassificationResult,
    pub context_summary: Option<String>,
    pub metadata: ChatMetadata,
}

#[derive(Debug, Clone)]
pub struct ChatMetadata {
    pub session_id: String,
    pub message_count: usize,
    pub total_tokens: u64,
}

/// Counts prompt tokens with a `cl100k_base` tokenizer so the Router's
/// cost/time estimate is driven by an actual token count rather than a
/// character-length guess.
fn count_prompt_tokens(messages: &[Message]) -> u32 {
    let Ok(tokenizer) = tiktoken_rs::cl100k_base() else {
        return messages.iter().map(|m| (m.content.len() / 4) as u32).sum();
    };
    messages
        .iter()
        .map(|m| tokenizer.encode_with_special_tokens(&m.content).len() as u32)
        .sum()
}

pub struct Orchestrator {
    classifier: IntentClassifier,
    router: Router,
    executor: FallbackExecutor,
    context: Arc<ContextStore>,
    aggregator: Arc<PerformanceAggregator>,
    registry: Arc<CapabilityRegistry>,
    health: Arc<HealthMonitor>,
    clock: Arc<dyn Clock>,
    response_generator: Arc<dyn ResponseGenerator>,
    background_tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorStats {
    pub enabled_models: usize,
    pub healthy_providers: usize,
    pub metrics_text: String,
}

impl Orchestrator {
    pub fn new(
        router: Router,
        executor: FallbackExecutor,
        context: Arc<ContextStore>,
        aggregator: Arc<PerformanceAggregator>,
        registry: Arc<CapabilityRegistry>,
        health: Arc<HealthMonitor>,
        clock: Arc<dyn Clock>,
        response_generator: Arc<dyn ResponseGenerator>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            router,
            executor,
            context,
            aggregator,
            registry,
            health,
            clock,
            response_generator,
            background_tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Starts the health prober, context-eviction sweep, alert evaluator,
    /// and metric-aggregation housekeeping. Kept separate from `new` so
    /// tests can construct an `Orchestrator` without spawning timers.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock();
        tasks.push(self.health.clone().spawn());
        tasks.push(self.context.clone().spawn_eviction_sweep());
        tasks.push(self.spawn_alert_evaluation());
        tasks.push(self.spawn_metric_aggregation());
    }

    /// Evaluates alert rules for every model with recorded metrics on the
    /// Performance Aggregator's 30s cadence; a rule whose `disable_model`
    /// action fires writes through to the Capability Registry from here.
    fn spawn_alert_evaluation(&self) -> tokio::task::JoinHandle<()> {
        let aggregator = self.aggregator.clone();
        let registry = self.registry.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PerformanceAggregator::alert_cadence());
            loop {
                interval.tick().await;
                let now = clock.now();
                for model in aggregator.observed_models() {
                    aggregator.evaluate_alerts(model, &registry, now);
                }
            }
        })
    }

    /// Minute-cadence housekeeping: drops raw metric samples older than
    /// the 24h retention window.
    fn spawn_metric_aggregation(&self) -> tokio::task::JoinHandle<()> {
        let aggregator = self.aggregator.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                aggregator.prune_expired(clock.now());
            }
        })
    }

    /// Stateless single-shot completion: route, execute with fallback,
    /// enrich with routing metadata.
    pub async fn complete(&self, mut request: LLMRequest) -> Result<LLMResponse, RouterError> {
        if request.messages.is_empty() {
            return Err(RouterError::ValidationError("request messages must not be empty".to_string()));
        }
        if request.task_context.context_size.is_none() {
            request.task_context.context_size = Some(count_prompt_tokens(&request.messages));
        }
        let decision = self.router.route(&request.task_context);
        let candidates: Vec<_> = std::iter::once(decision.primary).chain(decision.fallbacks.clone()).collect();

        let start = self.clock.now();
        let router = &self.router;
        let task_context = request.task_context.clone();
        let outcome = self
            .executor
            .execute(&candidates, &request.messages, &request.task_context, |model| {
                router.estimate_cost(model, &task_context)
            })
            .await?;
        let execution_time = (self.clock.now() - start).to_std().unwrap_or(Duration::ZERO);

        Ok(LLMResponse {
            content: outcome.response.content,
            model: outcome.model,
            usage: outcome.response.usage,
            confidence: decision.confidence as f32 / 100.0,
            routing_decision: decision,
            execution_time,
            cost: outcome.cost,
            fallback_used: outcome.fallback_used,
            retry_count: outcome.retry_count,
        })
    }

    /// Stateful entry point: get-or-create the
    /// session, append the user turn, classify intent from the turn plus
    /// recent history, delegate prose generation to the injected Response
    /// Generator, append the assistant turn, and return the bundle of
    /// response + intent + context summary + metadata. Never routes to a
    /// provider directly — that's `complete`'s job.
    pub async fn chat_with_context(
        &self,
        session_id: &str,
        user_text: &str,
        user_id: Option<&str>,
    ) -> Result<ChatResult, RouterError> {
        self.context.ensure_session(session_id, user_id).await;
        self.context.add_message(session_id, MessageRole::User, user_text).await;

        let classifier_ctx = ClassifierContext { is_business_hours: is_business_hours(self.clock.now()), ..Default::default() };
        let intent = self.classifier.classify_full(user_text, &classifier_ctx, Complexity::Medium);
        self.context.set_current_task(session_id, format!("{:?}", intent.primary.task_type)).await;

        let snapshot = self.context.snapshot(session_id).await;
        let reply = match self
            .response_generator
            .generate(&intent, &snapshot, user_text, intent.primary.agent_type)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, session_id, "response generator failed, returning canned apology");
                GeneratedReply {
                    content: "Sorry, I wasn't able to put together a response for that just now — please try again.".to_string(),
                    suggested_actions: Vec::new(),
                    follow_up_questions: Vec::new(),
                    clarifications: Vec::new(),
                    confidence: GENERATOR_FAILURE_CONFIDENCE,
                }
            }
        };

        self.context.add_message(session_id, MessageRole::Assistant, &reply.content).await;

        let metadata = ChatMetadata {
            session_id: session_id.to_string(),
            message_count: self.context.message_count(session_id).await,
            total_tokens: self.context.total_tokens(session_id).await,
        };
        let context_summary = self.context.summarize(session_id).await;

        Ok(ChatResult { response: reply, intent, context_summary, metadata })
    }

    pub async fn context_summary(&self, session_id: &str) -> Option<String> {
        self.context.summarize(session_id).await
    }

    pub async fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            enabled_models: self.registry.all_enabled().len(),
            healthy_providers: self.health.snapshot().await.into_iter().filter(|p| p.healthy).count(),
            metrics_text: self.aggregator.gather(),
        }
    }

    /// Aborts background timers; in-flight requests already holding an
    /// `Arc<Orchestrator>` run to completion.
    pub fn shutdown(&self) {
        let mut tasks = self.background_tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::{AlertThresholds, FallbackConfig};
    use crate::health::ProviderHandle;
    use crate::metrics::SuccessRateTracker;
    use crate::models::{Complexity, FinishReason, Priority, ProviderResponse, TaskType, UserTier, Usage};
    use crate::response_generator::TemplateResponseGenerator;
    use async_trait::async_trait;
    use chrono::Utc;

    #[derive(Debug)]
    struct AlwaysOkProvider;

    #[async_trait]
    impl crate::providers::ProviderClient for AlwaysOkProvider {
        fn name(&self) -> &str {
            "stub"
        }
        async fn complete(&self, _model: crate::models::Model, _messages: &[Message]) -> Result<ProviderResponse, RouterError> {
            Ok(ProviderResponse {
                content: "hello back".to_string(),
                usage: Usage::default(),
                finish_reason: FinishReason::Stop,
            })
        }
        async fn ping(&self) -> bool {
            true
        }
    }

    fn build_orchestrator() -> Orchestrator {
        let fixed_clock = Arc::new(FixedClock::new(Utc::now()));
        let clock: Arc<dyn Clock> = fixed_clock.clone();
        let sleeper: Arc<dyn crate::clock::Sleeper> = fixed_clock;
        let registry = Arc::new(CapabilityRegistry::new());
        let success_rates = Arc::new(SuccessRateTracker::new());
        let router = Router::new(registry.clone(), success_rates.clone(), crate::config::RoutingStrategy::Balanced);
        let handle = Arc::new(ProviderHandle::new("stub", Arc::new(AlwaysOkProvider), crate::models::Model::all().to_vec()));
        let health = Arc::new(HealthMonitor::new(vec![handle], Duration::from_secs(60)));
        let aggregator = Arc::new(PerformanceAggregator::new(success_rates, AlertThresholds::default()));
        let executor = FallbackExecutor::new(
            health.clone(),
            FallbackConfig {
                max_retry_attempts: 3,
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
            clock.clone(),
            sleeper,
            aggregator.clone(),
        );
        let context = Arc::new(ContextStore::new(100, Duration::from_secs(86_400), clock.clone()));
        let response_generator = Arc::new(TemplateResponseGenerator::new());
        Orchestrator::new(router, executor, context, aggregator, registry, health, clock, response_generator)
    }

    #[tokio::test]
    async fn empty_messages_is_rejected_without_touching_a_provider() {
        let orchestrator = build_orchestrator();
        let ctx = TaskContext::new(TaskType::GeneralQuery, Complexity::Low, Priority::Medium, UserTier::Free);
        let request = LLMRequest { messages: Vec::new(), task_context: ctx };
        let err = orchestrator.complete(request).await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::ValidationError);
    }

    #[tokio::test]
    async fn complete_returns_response_with_routing_metadata() {
        let orchestrator = build_orchestrator();
        let ctx = TaskContext::new(TaskType::GeneralQuery, Complexity::Low, Priority::Medium, UserTier::Free);
        let request = LLMRequest {
            messages: vec![Message { role: MessageRole::User, content: "hi".to_string() }],
            task_context: ctx,
        };
        let response = orchestrator.complete(request).await.unwrap();
        assert_eq!(response.content, "hello back");
        assert!(!response.fallback_used);
    }

    #[tokio::test]
    async fn chat_with_context_preserves_session_state() {
        let orchestrator = build_orchestrator();
        let first = orchestrator
            .chat_with_context("session-1", "please summarize this text", Some("user-1"))
            .await
            .unwrap();
        assert!(!first.response.content.is_empty());
        assert_eq!(first.metadata.message_count, 2);
        let summary = orchestrator.context.summarize("session-1").await;
        assert!(summary.is_some());
    }

    #[tokio::test]
    async fn ambiguous_chat_still_returns_a_clarifying_response() {
        let orchestrator = build_orchestrator();
        let result = orchestrator.chat_with_context("session-2", "hey", None).await.unwrap();
        assert!(result.intent.needs_clarification);
        assert!(!result.intent.clarification_questions.is_empty());
        assert_eq!(result.metadata.message_count, 2);
    }

    #[tokio::test]
    async fn stats_reports_enabled_models_and_metrics_text() {
        let orchestrator = build_orchestrator();
        orchestrator.start_background_tasks();
        let stats = orchestrator.stats().await;
        assert!(stats.enabled_models > 0);
        orchestrator.shutdown();
    }
}
