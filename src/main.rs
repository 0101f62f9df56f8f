//! Demo binary: builds a router from environment configuration, runs a
//! couple of representative requests through it, and prints a stats
//! snapshot. Transport (HTTP/WebSocket) is an external collaborator
//! and is intentionally not reproduced here.

use llm_router::models::{Complexity, MessageRole, Priority, TaskContext, TaskType, UserTier};
use llm_router::{LLMRequest, Message};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = llm_router::config::RouterConfig::from_env();
    let orchestrator = llm_router::initialize(config)?;

    let request = LLMRequest {
        messages: vec![Message {
            role: MessageRole::User,
            content: "Extract the company name and job title from this listing.".to_string(),
        }],
        task_context: TaskContext::new(TaskType::DataExtraction, Complexity::Medium, Priority::Medium, UserTier::Free),
    };

    match orchestrator.complete(request).await {
        Ok(response) => {
            tracing::info!(model = %response.model, cost = response.cost, "request completed");
            println!("{}", response.content);
        }
        Err(err) => {
            tracing::error!(error = %err, "request failed");
        }
    }

    match orchestrator
        .chat_with_context("demo-session", "Can you summarize our conversation so far?", Some("demo-user"))
        .await
    {
        Ok(result) => println!("{}", result.response.content),
        Err(err) => tracing::error!(error = %err, "chat request failed"),
    }

    let stats = orchestrator.stats().await;
    println!(
        "enabled_models={} healthy_providers={}",
        stats.enabled_models, stats.healthy_providers
    );

    orchestrator.shutdown();
    Ok(())
}
