//! Closed sum types for the router's data model.
//!
//! Dynamic typing of `TaskContext` / routing parameters is replaced here
//! with closed enums: unknown values at the boundary become
//! `RouterError::ValidationError`, never a silent fallback route.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A named LLM addressable behind a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Model {
    Mistral7B,
    Llama8B,
    Llama70B,
    NemoRetriever,
    DeepseekCoder,
    CodeLlama,
    Mixtral8x7B,
    Claude35Sonnet,
    Gpt4o,
}

impl Model {
    pub fn all() -> &'static [Model] {
        &[
            Model::Mistral7B,
            Model::Llama8B,
            Model::Llama70B,
            Model::NemoRetriever,
            Model::DeepseekCoder,
            Model::CodeLlama,
            Model::Mixtral8x7B,
            Model::Claude35Sonnet,
            Model::Gpt4o,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Mistral7B => "mistral-7b",
            Model::Llama8B => "llama-8b",
            Model::Llama70B => "llama-70b",
            Model::NemoRetriever => "nemo-retriever",
            Model::DeepseekCoder => "deepseek-coder",
            Model::CodeLlama => "code-llama",
            Model::Mixtral8x7B => "mixtral-8x7b",
            Model::Claude35Sonnet => "claude-3-5-sonnet",
            Model::Gpt4o => "gpt-4o",
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ten-dimension capability score, 0-100 except `cost` (per-1K-token rate)
/// and `context_length` (tokens). Immutable at runtime except via the
/// registry's `enabled` flag and derived success rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CapabilityVector {
    pub planning: u8,
    pub navigation: u8,
    pub extraction: u8,
    pub reasoning: u8,
    pub coding: u8,
    pub summarization: u8,
    pub speed: u8,
    pub reliability: u8,
    pub cost: f64,
    pub context_length: u32,
}

/// Closed set of task types. Seven of these carry a pattern in the Intent
/// Classifier; `CustomWorkflow` and `GeneralQuery` route via
/// agent type / feature heuristics instead of a keyword pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    DataExtraction,
    ContactScraping,
    CompanyResearch,
    JobSearch,
    FormFilling,
    Summarization,
    CustomWorkflow,
    GeneralQuery,
}

impl TaskType {
    /// The seven patterned task types scored by the Intent Classifier's
    /// pattern matcher.
    pub fn patterned() -> &'static [TaskType] {
        &[
            TaskType::DataExtraction,
            TaskType::ContactScraping,
            TaskType::CompanyResearch,
            TaskType::JobSearch,
            TaskType::FormFilling,
            TaskType::Summarization,
            TaskType::CustomWorkflow,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentType {
    Navigator,
    Planner,
    Extractor,
    Verifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Scales the duration estimate: `{0.7, 1.0, 1.5}`.
    pub fn multiplier(self) -> f64 {
        match self {
            Complexity::Low => 0.7,
            Complexity::Medium => 1.0,
            Complexity::High => 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    Free,
    Premium,
    Enterprise,
}

/// Caller-supplied, immutable-after-construction task descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_type: TaskType,
    pub agent_type: Option<AgentType>,
    pub complexity: Complexity,
    pub priority: Priority,
    pub user_tier: UserTier,
    pub budget_limit: Option<f64>,
    #[serde(with = "duration_secs_opt", default)]
    pub time_limit: Option<Duration>,
    pub previous_failures: Option<u32>,
    pub context_size: Option<u32>,
}

impl TaskContext {
    pub fn new(task_type: TaskType, complexity: Complexity, priority: Priority, user_tier: UserTier) -> Self {
        Self {
            task_type,
            agent_type: None,
            complexity,
            priority,
            user_tier,
            budget_limit: None,
            time_limit: None,
            previous_failures: None,
            context_size: None,
        }
    }

    pub fn with_agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = Some(agent_type);
        self
    }

    pub fn with_budget_limit(mut self, budget_limit: f64) -> Self {
        self.budget_limit = Some(budget_limit);
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = Some(time_limit);
        self
    }

    pub fn with_context_size(mut self, context_size: u32) -> Self {
        self.context_size = Some(context_size);
        self
    }
}

mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<f64> = Option::deserialize(d)?;
        Ok(secs.map(Duration::from_secs_f64))
    }
}

/// Router's choice of primary model + ordered fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub primary: Model,
    pub fallbacks: Vec<Model>,
    pub rationale: String,
    pub confidence: u8,
    pub est_cost: f64,
    pub est_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
}

/// Normalized provider response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

/// Request sent into `Orchestrator::complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMRequest {
    pub messages: Vec<Message>,
    pub task_context: TaskContext,
}

/// Response returned from `Orchestrator::complete`, enriched with routing
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: Model,
    pub usage: Usage,
    pub routing_decision: RouteDecision,
    pub execution_time: Duration,
    pub cost: f64,
    pub confidence: f32,
    pub fallback_used: bool,
    pub retry_count: u32,
}
