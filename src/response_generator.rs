//! Response Generator: the external collaborator that turns
//! a classified `Intent` plus conversational context into user-facing
//! prose. Response-templating for user-facing prose stays out of the
//! core entirely — this module defines only the seam
//! (`ResponseGenerator`) the Orchestrator calls through, plus a minimal
//! template-based default so the crate is runnable standalone without a
//! caller-supplied implementation.
//!
//! Callback-style generation (`onChunk`/`onComplete`) is replaced with a
//! plain async trait method returning a finished `GeneratedReply` — there
//! is no streaming variant here because templated replies are produced
//! in one shot.

use crate::classifier::ClassificationResult;
use crate::context::ContextSnapshot;
use crate::error::RouterError;
use crate::models::AgentType;
use async_trait::async_trait;

/// Output of a response generation call.
#[derive(Debug, Clone, Default)]
pub struct GeneratedReply {
    pub content: String,
    pub suggested_actions: Vec<String>,
    pub follow_up_questions: Vec<String>,
    pub clarifications: Vec<String>,
    pub confidence: f32,
}

/// External collaborator the Orchestrator's `chatWithContext` delegates
/// user-facing text generation to. Implementations are expected to be
/// side-effect-free with respect to the core.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        intent: &ClassificationResult,
        context: &ContextSnapshot,
        user_text: &str,
        agent_type: Option<AgentType>,
    ) -> Result<GeneratedReply, RouterError>;
}

/// Minimal template-based default. Real prose generation is out of scope
/// for this crate — this exists so `initialize()` can hand back
/// a working `Orchestrator` without requiring every caller to supply their
/// own generator just to exercise the chat path.
#[derive(Debug, Default)]
pub struct TemplateResponseGenerator;

impl TemplateResponseGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseGenerator for TemplateResponseGenerator {
    async fn generate(
        &self,
        intent: &ClassificationResult,
        context: &ContextSnapshot,
        user_text: &str,
        agent_type: Option<AgentType>,
    ) -> Result<GeneratedReply, RouterError> {
        if intent.needs_clarification {
            return Ok(GeneratedReply {
                content: intent
                    .clarification_questions
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "Could you clarify what you'd like me to do?".to_string()),
                suggested_actions: Vec::new(),
                follow_up_questions: intent.clarification_questions.clone(),
                clarifications: intent.clarification_questions.clone(),
                confidence: intent.confidence as f32,
            });
        }

        let agent_hint = agent_type.map(|a| format!(" as a {a:?} agent")).unwrap_or_default();
        let recalled = if context.recent_messages.is_empty() {
            String::new()
        } else {
            format!(" I recall {} earlier message(s) in this session.", context.recent_messages.len())
        };

        Ok(GeneratedReply {
            content: format!(
                "Working on your {:?} request{agent_hint}: \"{}\".{recalled}",
                intent.primary.task_type,
                user_text.chars().take(120).collect::<String>()
            ),
            suggested_actions: vec!["review_result".to_string()],
            follow_up_questions: Vec::new(),
            clarifications: Vec::new(),
            confidence: intent.confidence as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::IntentClassifier;
    use crate::models::Complexity;

    #[tokio::test]
    async fn ambiguous_intent_yields_clarifying_reply() {
        let classifier = IntentClassifier::new();
        let result = classifier.classify_full("help me with work stuff", &Default::default(), Complexity::Medium);
        let generator = TemplateResponseGenerator::new();
        let snapshot = ContextSnapshot { recent_messages: Vec::new(), top_entities: Vec::new() };
        let reply = generator.generate(&result, &snapshot, "help me with work stuff", None).await.unwrap();
        assert!(!reply.clarifications.is_empty());
    }

    #[tokio::test]
    async fn confident_intent_yields_task_reply() {
        let classifier = IntentClassifier::new();
        let result = classifier.classify_full("please extract and pull data from this job listing page", &Default::default(), Complexity::Medium);
        let generator = TemplateResponseGenerator::new();
        let snapshot = ContextSnapshot { recent_messages: Vec::new(), top_entities: Vec::new() };
        let reply = generator.generate(&result, &snapshot, "please extract and pull data", None).await.unwrap();
        assert!(reply.clarifications.is_empty());
        assert!(reply.content.contains("DataExtraction"));
    }
}
