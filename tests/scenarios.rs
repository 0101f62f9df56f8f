//! End-to-end scenarios exercising the Orchestrator through its public
//! surface, with a stub provider standing in for the network.

use async_trait::async_trait;
use chrono::Utc;
use llm_router::capability::CapabilityRegistry;
use llm_router::clock::{Clock, FixedClock};
use llm_router::config::{FallbackConfig, RoutingStrategy};
use llm_router::context::ContextStore;
use llm_router::error::RouterError;
use llm_router::health::{HealthMonitor, ProviderHandle};
use llm_router::metrics::{PerformanceAggregator, SuccessRateTracker};
use llm_router::models::{
    Complexity, FinishReason, Model, Priority, ProviderResponse, TaskContext, TaskType, UserTier, Usage,
};
use llm_router::providers::ProviderClient;
use llm_router::response_generator::TemplateResponseGenerator;
use llm_router::router::Router;
use llm_router::{LLMRequest, Message, MessageRole, Orchestrator};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct ScriptedProvider {
    name: String,
    calls: AtomicU32,
    fail_times: u32,
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, model: Model, _messages: &[Message]) -> Result<ProviderResponse, RouterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            Err(RouterError::ServerError(format!("{} temporarily unavailable", self.name)))
        } else {
            Ok(ProviderResponse {
                content: format!("response from {model}"),
                usage: Usage { prompt_tokens: 10, completion_tokens: 20, total_tokens: 30 },
                finish_reason: FinishReason::Stop,
            })
        }
    }

    async fn ping(&self) -> bool {
        true
    }
}

fn build_orchestrator(fail_times: u32) -> Orchestrator {
    let fixed_clock = Arc::new(FixedClock::new(Utc::now()));
    let clock: Arc<dyn Clock> = fixed_clock.clone();
    let sleeper: Arc<dyn llm_router::clock::Sleeper> = fixed_clock;
    let registry = Arc::new(CapabilityRegistry::new());
    let success_rates = Arc::new(SuccessRateTracker::new());
    let router = Router::new(registry.clone(), success_rates.clone(), RoutingStrategy::Balanced);

    // Every model maps to this single provider, so falling back between
    // models still exercises the executor's retry path deterministically
    // (the call counter advances once per candidate regardless of model).
    let provider = Arc::new(ScriptedProvider {
        name: "stub".to_string(),
        calls: AtomicU32::new(0),
        fail_times,
    });

    let handles = vec![Arc::new(ProviderHandle::new("stub", provider, Model::all().to_vec()))];
    let health = Arc::new(HealthMonitor::new(handles, Duration::from_secs(60)));
    let aggregator = Arc::new(PerformanceAggregator::new(success_rates, llm_router::config::AlertThresholds::default()));
    let executor = llm_router::executor::FallbackExecutor::new(
        health.clone(),
        FallbackConfig {
            max_retry_attempts: 1,
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
async fn navigator_low_complexity_fast_path() {
    let orchestrator = build_orchestrator(0);
    let ctx = TaskContext::new(TaskType::FormFilling, Complexity::Low, Priority::Medium, UserTier::Premium)
        .with_agent_type(llm_router::models::AgentType::Navigator);
    let request = LLMRequest {
        messages: vec![Message { role: MessageRole::User, content: "fill out this form".to_string() }],
        task_context: ctx,
    };
    let response = orchestrator.complete(request).await.unwrap();
    assert!(matches!(response.model, Model::Mistral7B | Model::Llama8B));
    assert!(!response.fallback_used);
}

#[tokio::test]
async fn primary_failure_triggers_successful_fallback() {
    let orchestrator = build_orchestrator(1); // first candidate fails, second succeeds
    let ctx = TaskContext::new(TaskType::DataExtraction, Complexity::Medium, Priority::Medium, UserTier::Premium)
        .with_agent_type(llm_router::models::AgentType::Extractor);
    let request = LLMRequest {
        messages: vec![Message { role: MessageRole::User, content: "extract the fields".to_string() }],
        task_context: ctx,
    };
    let response = orchestrator.complete(request).await.unwrap();
    assert!(response.fallback_used);
}

#[tokio::test]
async fn context_continuity_across_turns() {
    let orchestrator = build_orchestrator(0);
    orchestrator
        .chat_with_context("session-a", "I want to find jobs", Some("user-a"))
        .await
        .unwrap();
    let second = orchestrator
        .chat_with_context("session-a", "Make them software engineering positions", Some("user-a"))
        .await
        .unwrap();
    assert_eq!(second.metadata.message_count, 4);
    let summary = orchestrator.context_summary("session-a").await;
    assert!(summary.is_some());
    assert!(summary.unwrap().to_lowercase().contains("software"));
}

#[tokio::test]
async fn budget_override_forces_lightweight_model() {
    let orchestrator = build_orchestrator(0);
    let ctx = TaskContext::new(TaskType::CompanyResearch, Complexity::High, Priority::Medium, UserTier::Enterprise)
        .with_budget_limit(0.005);
    let request = LLMRequest {
        messages: vec![Message { role: MessageRole::User, content: "research this company".to_string() }],
        task_context: ctx,
    };
    let response = orchestrator.complete(request).await.unwrap();
    assert_eq!(response.model, Model::Mistral7B);
}

#[tokio::test]
async fn ambiguous_chat_elicits_clarification() {
    let orchestrator = build_orchestrator(0);
    let result = orchestrator
        .chat_with_context("session-b", "help me with work stuff", Some("u1"))
        .await
        .unwrap();
    assert!(result.intent.needs_clarification);
    assert!(!result.intent.clarification_questions.is_empty());
    assert!(result.intent.confidence < 0.7);
    assert_eq!(result.metadata.message_count, 2);
}
