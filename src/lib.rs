//! Multi-provider LLM request router and conversation orchestrator.
//!
//! Module layout mirrors the component boundaries: one file per
//! component, wired together by [`orchestrator::Orchestrator`].

pub mod capability;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod response_generator;
pub mod router;

pub use error::{PublicError, RouterError};
pub use models::{LLMRequest, LLMResponse, Message, MessageRole, TaskContext};
pub use orchestrator::{ChatMetadata, ChatResult, Orchestrator, OrchestratorStats};
pub use response_generator::{GeneratedReply, ResponseGenerator};

use crate::capability::CapabilityRegistry;
use crate::clock::{Clock, Sleeper, SystemClock};
use crate::config::RouterConfig;
use crate::executor::FallbackExecutor;
use crate::health::{HealthMonitor, ProviderHandle};
use crate::metrics::{PerformanceAggregator, SuccessRateTracker};
use crate::providers::{AnthropicCompatProvider, NativeProvider, OpenAiCompatProvider, ProviderClient, ProviderConfig};
use crate::response_generator::TemplateResponseGenerator;
use crate::router::Router;
use std::sync::Arc;

/// Builds an `Orchestrator` from a validated `RouterConfig`, using the
/// crate's minimal [`TemplateResponseGenerator`] for chat prose. Callers
/// with their own Response Generator
/// should use [`initialize_with_generator`] instead.
pub fn initialize(config: RouterConfig) -> Result<Arc<Orchestrator>, RouterError> {
    initialize_with_generator(config, Arc::new(TemplateResponseGenerator::new()))
}

/// Builds an `Orchestrator` from a validated `RouterConfig`, wiring every
/// provider dialect to the model families it natively serves.
/// This is the crate's single composition root — callers needing custom
/// wiring (e.g. injected test doubles, or their own Response Generator)
/// should construct `Orchestrator` directly instead.
pub fn initialize_with_generator(
    config: RouterConfig,
    response_generator: Arc<dyn crate::response_generator::ResponseGenerator>,
) -> Result<Arc<Orchestrator>, RouterError> {
    config.validate()?;

    let registry = Arc::new(CapabilityRegistry::new());
    let success_rates = Arc::new(SuccessRateTracker::new());
    let router = Router::new(registry.clone(), success_rates.clone(), config.routing.strategy);
    let aggregator = Arc::new(PerformanceAggregator::new(success_rates, config.alert_thresholds.clone()));

    let mut handles = Vec::new();
    for provider in &config.providers {
        let models = models_for_provider(&provider.name);
        let provider_config = ProviderConfig {
            name: provider.name.clone(),
            base_url: provider.base_url.clone(),
            api_key: provider.api_key.clone(),
            timeout: provider.timeout,
            models: models.iter().copied().collect(),
        };
        let client: Arc<dyn ProviderClient> = match provider.name.as_str() {
            "ollama" => Arc::new(NativeProvider::new(provider_config)),
            "anthropic" => Arc::new(AnthropicCompatProvider::new(provider_config)),
            _ => Arc::new(OpenAiCompatProvider::new(provider_config)),
        };
        handles.push(Arc::new(ProviderHandle::with_timeout(provider.name.clone(), client, models, provider.timeout)));
    }

    let health = Arc::new(HealthMonitor::new(handles, config.performance.health_check_interval));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sleeper: Arc<dyn Sleeper> = Arc::new(SystemClock);
    let executor = FallbackExecutor::new(health.clone(), config.fallback.clone(), clock.clone(), sleeper, aggregator.clone());
    let context = Arc::new(context::ContextStore::new(config.context_message_cap, config.context_ttl, clock.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        router,
        executor,
        context,
        aggregator,
        registry,
        health,
        clock,
        response_generator,
    ));
    orchestrator.start_background_tasks();
    Ok(orchestrator)
}

fn models_for_provider(name: &str) -> Vec<models::Model> {
    use models::Model::*;
    match name {
        "ollama" => vec![Mistral7B, Llama8B, Llama70B, NemoRetriever, CodeLlama, Mixtral8x7B],
        "lm_studio" => vec![DeepseekCoder, CodeLlama],
        "openai" => vec![Gpt4o],
        "anthropic" => vec![Claude35Sonnet],
        _ => Vec::new(),
    }
}

