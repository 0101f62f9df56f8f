//! Intent Classifier: three-layer scorer over free-text input,
//! producing a typed `Intent` (task type, agent type, complexity, priority,
//! confidence, parameters, required capabilities) plus a `ClassificationResult`
//! carrying alternatives and clarification questions.
//!
//! Uses a weighted, multi-signal scoring shape: independent 0..1 signals
//! are combined and normalized rather than picking a single dominant
//! heuristic.

use crate::models::{AgentType, Complexity, Priority, TaskType};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const PATTERN_WEIGHT: f64 = 0.5;
const CONTEXT_WEIGHT: f64 = 0.3;
const FEATURE_WEIGHT: f64 = 0.2;
const PATTERN_SCORE_THRESHOLD: f64 = 0.1;
const CLARIFICATION_CONFIDENCE_FLOOR: f64 = 0.7;
const CLARIFICATION_MARGIN: f64 = 0.2;
const MAX_ALTERNATIVES: usize = 3;

fn patterns(task_type: TaskType) -> (&'static [&'static str], &'static [&'static str]) {
    match task_type {
        TaskType::DataExtraction => (
            &["extract", "scrape", "pull data", "parse the", "get the fields"],
            &["job listing", "apply to"],
        ),
        TaskType::ContactScraping => (
            &["find contacts", "email address", "phone number", "contact info", "reach out to"],
            &["my contacts", "address book"],
        ),
        TaskType::CompanyResearch => (
            &["research", "company background", "tell me about", "look up the company"],
            &["my company"],
        ),
        TaskType::JobSearch => (
            &["find jobs", "job openings", "job search", "hiring for", "apply for positions"],
            &["job history"],
        ),
        TaskType::FormFilling => (
            &["fill out", "fill in the form", "submit the application", "complete the form"],
            &["form factor"],
        ),
        TaskType::Summarization => (
            &["summarize", "tl;dr", "give me a summary", "condense this"],
            &["summary judgment"],
        ),
        TaskType::CustomWorkflow => (
            &["then do", "step 1", "workflow", "automate the process", "chain of steps"],
            &[],
        ),
        TaskType::GeneralQuery => (&[], &[]),
    }
}

/// The agent type a task type most naturally maps to, for Intents derived
/// purely from text (no explicit agent hint supplied by the caller) — same
/// grouping the Router's rule selector uses.
fn default_agent_type(task_type: TaskType) -> Option<AgentType> {
    match task_type {
        TaskType::FormFilling => Some(AgentType::Navigator),
        TaskType::CustomWorkflow => Some(AgentType::Planner),
        TaskType::DataExtraction | TaskType::ContactScraping => Some(AgentType::Extractor),
        TaskType::Summarization => Some(AgentType::Verifier),
        TaskType::CompanyResearch | TaskType::JobSearch | TaskType::GeneralQuery => None,
    }
}

/// Closed set of capability dimensions an Intent declares as required,
/// mirroring the `CapabilityVector` dimension names the Router scores
/// against.
fn required_capabilities(task_type: TaskType) -> HashSet<&'static str> {
    let dims: &[&str] = match task_type {
        TaskType::DataExtraction | TaskType::ContactScraping => &["extraction", "reliability"],
        TaskType::CompanyResearch => &["extraction", "reasoning"],
        TaskType::JobSearch => &["extraction", "speed"],
        TaskType::FormFilling => &["navigation", "speed"],
        TaskType::Summarization => &["summarization"],
        TaskType::CustomWorkflow => &["planning", "coding"],
        TaskType::GeneralQuery => &["reasoning"],
    };
    dims.iter().copied().collect()
}

/// Priority inferred from text urgency markers, used to seed the
/// suggested `TaskContext` when the caller doesn't supply one explicitly.
fn infer_priority(text: &str) -> Priority {
    const URGENT_WORDS: &[&str] = &["urgent", "asap", "right now", "immediately", "emergency"];
    const HIGH_WORDS: &[&str] = &["soon", "today", "quickly", "priority"];
    if URGENT_WORDS.iter().any(|w| text.contains(w)) {
        Priority::Urgent
    } else if HIGH_WORDS.iter().any(|w| text.contains(w)) {
        Priority::High
    } else {
        Priority::Medium
    }
}

fn score_pattern(text: &str, task_type: TaskType) -> f64 {
    let (positive, negative) = patterns(task_type);
    if positive.is_empty() {
        return 0.0;
    }
    let hits = positive.iter().filter(|p| text.contains(*p)).count();
    let misses = negative.iter().filter(|n| text.contains(*n)).count();
    let raw = (hits as f64 - misses as f64 * 0.5) / positive.len() as f64;
    raw.max(0.0).min(1.0)
}

#[derive(Debug, Clone, Default)]
pub struct ClassifierContext {
    pub previous_tasks: Vec<TaskType>,
    pub user_profile_hints: Vec<String>,
    pub current_page_hint: Option<String>,
    pub is_business_hours: bool,
}

fn score_context(ctx: &ClassifierContext, task_type: TaskType) -> f64 {
    let mut score = 0.0;

    if ctx.previous_tasks.last() == Some(&task_type) {
        score += 0.4;
    }

    let (positive, _) = patterns(task_type);
    for hint in &ctx.user_profile_hints {
        if positive.iter().any(|p| hint.contains(p)) {
            score += 0.2;
        }
    }

    if let Some(page) = &ctx.current_page_hint {
        if page.contains("linkedin") && matches!(task_type, TaskType::JobSearch) {
            score += 0.4;
        } else if positive.iter().any(|p| page.contains(p)) {
            score += 0.2;
        }
    }

    if ctx.is_business_hours && matches!(task_type, TaskType::CompanyResearch | TaskType::JobSearch) {
        score += 0.1;
    }

    score.min(1.0)
}

fn score_features(text: &str, task_type: TaskType) -> f64 {
    let word_count = text.split_whitespace().count() as f64;
    let question_mark = text.contains('?');
    let has_url = text.contains("http://") || text.contains("https://");

    match task_type {
        TaskType::DataExtraction | TaskType::ContactScraping => {
            let mut score = (word_count / 30.0).min(1.0) * 0.5;
            if has_url {
                score += 0.5;
            }
            score.min(1.0)
        }
        TaskType::CompanyResearch | TaskType::JobSearch => {
            if question_mark {
                0.6
            } else {
                0.3
            }
        }
        TaskType::FormFilling => if has_url { 0.7 } else { 0.3 },
        TaskType::Summarization => (word_count / 200.0).min(1.0),
        TaskType::CustomWorkflow => if text.matches(',').count() >= 2 { 0.6 } else { 0.2 },
        TaskType::GeneralQuery => 0.0,
    }
}

fn base_duration(task_type: TaskType) -> Duration {
    match task_type {
        TaskType::DataExtraction => Duration::from_secs(20),
        TaskType::ContactScraping => Duration::from_secs(25),
        TaskType::CompanyResearch => Duration::from_secs(45),
        TaskType::JobSearch => Duration::from_secs(30),
        TaskType::FormFilling => Duration::from_secs(15),
        TaskType::Summarization => Duration::from_secs(10),
        TaskType::CustomWorkflow => Duration::from_secs(60),
        TaskType::GeneralQuery => Duration::from_secs(8),
    }
}

/// Fixed table of clarification questions keyed on the (primary,
/// runner-up) task-type pair. Falls back to a generic prompt
/// for pairs the table doesn't name explicitly.
fn clarification_questions(primary: TaskType, alternative: Option<TaskType>) -> Vec<String> {
    use TaskType::*;
    let specific = match (primary, alternative) {
        (JobSearch, Some(CompanyResearch)) | (CompanyResearch, Some(JobSearch)) => Some(
            "Are you looking for open roles, or background on a specific company?",
        ),
        (DataExtraction, Some(ContactScraping)) | (ContactScraping, Some(DataExtraction)) => Some(
            "Do you want general page data, or specifically contact details?",
        ),
        (FormFilling, Some(CustomWorkflow)) | (CustomWorkflow, Some(FormFilling)) => Some(
            "Is this a single form to fill out, or a multi-step process?",
        ),
        (Summarization, Some(CompanyResearch)) | (CompanyResearch, Some(Summarization)) => Some(
            "Do you want a summary of what we've discussed, or new research on a company?",
        ),
        _ => None,
    };

    let mut questions = Vec::new();
    if let Some(q) = specific {
        questions.push(q.to_string());
    }
    questions.push("Could you say a bit more about what you'd like me to do?".to_string());
    questions.truncate(2);
    questions
}

/// The classifier's typed interpretation of a user message.
#[derive(Debug, Clone)]
pub struct Intent {
    pub task_type: TaskType,
    pub agent_type: Option<AgentType>,
    pub complexity: Complexity,
    pub priority: Priority,
    pub confidence: f64,
    pub needs_clarification: bool,
    pub parameters: HashMap<String, String>,
    pub estimated_duration: Duration,
    pub required_capabilities: HashSet<&'static str>,
}

impl Intent {
    fn build(task_type: TaskType, confidence: f64, complexity: Complexity, text: &str, needs_clarification: bool) -> Self {
        let mut parameters = HashMap::new();
        parameters.insert("source_text_len".to_string(), text.len().to_string());
        Self {
            task_type,
            agent_type: default_agent_type(task_type),
            complexity,
            priority: infer_priority(text),
            confidence: confidence.clamp(0.0, 1.0),
            needs_clarification,
            parameters,
            estimated_duration: base_duration(task_type).mul_f64(complexity.multiplier()),
            required_capabilities: required_capabilities(task_type),
        }
    }

    fn fallback(complexity: Complexity, text: &str) -> Self {
        Self::build(TaskType::DataExtraction, 0.5, complexity, text, true)
    }
}

/// The classifier's full output: the winning Intent plus up to three
/// runner-up alternatives and, when ambiguous, a set of clarification
/// questions to pose back to the caller.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub primary: Intent,
    pub alternatives: Vec<Intent>,
    pub reasoning: String,
    pub confidence: f64,
    pub needs_clarification: bool,
    pub clarification_questions: Vec<String>,
}

pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Convenience wrapper returning just the primary `Intent` (used by
    /// callers that don't need alternatives/clarification questions).
    pub fn classify(&self, text: &str, ctx: &ClassifierContext, complexity: Complexity) -> Intent {
        self.classify_full(text, ctx, complexity).primary
    }

    /// Classifies `text` into a ranked set of `Intent`s. On any internal
    /// failure (no scorable candidate at all), returns the fallback Intent
    /// `{DataExtraction, confidence=0.5, needs_clarification=true}` — callers
    /// must not treat classifier failure as fatal.
    pub fn classify_full(&self, text: &str, ctx: &ClassifierContext, complexity: Complexity) -> ClassificationResult {
        let normalized = text.to_lowercase();
        let mut scores = HashMap::new();

        for task_type in TaskType::patterned() {
            let pattern_score = score_pattern(&normalized, *task_type);
            let context_score = score_context(ctx, *task_type);
            let feature_score = score_features(&normalized, *task_type);
            let combined = PATTERN_WEIGHT * pattern_score + CONTEXT_WEIGHT * context_score + FEATURE_WEIGHT * feature_score;
            scores.insert(*task_type, combined);
        }

        let viable: Vec<(TaskType, f64)> = scores
            .iter()
            .filter(|(task_type, _)| score_pattern(&normalized, **task_type) >= PATTERN_SCORE_THRESHOLD)
            .map(|(t, s)| (*t, *s))
            .collect();

        let mut ranked: Vec<(TaskType, f64)> = if viable.is_empty() {
            scores.iter().map(|(t, s)| (*t, *s)).collect()
        } else {
            viable
        };
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let Some((top_type, top_score)) = ranked.first().copied() else {
            let fallback = Intent::fallback(complexity, text);
            return ClassificationResult {
                confidence: fallback.confidence,
                needs_clarification: fallback.needs_clarification,
                clarification_questions: clarification_questions(fallback.task_type, None),
                reasoning: "no scorable candidate; returning safe default".to_string(),
                primary: fallback,
                alternatives: Vec::new(),
            };
        };

        if top_score <= 0.0 {
            let fallback = Intent::fallback(complexity, text);
            return ClassificationResult {
                confidence: fallback.confidence,
                needs_clarification: fallback.needs_clarification,
                clarification_questions: clarification_questions(fallback.task_type, None),
                reasoning: "all candidates scored zero; returning safe default".to_string(),
                primary: fallback,
                alternatives: Vec::new(),
            };
        }

        let second_best = ranked.get(1).map(|(_, s)| *s).unwrap_or(0.0);
        let needs_clarification = top_score < CLARIFICATION_CONFIDENCE_FLOOR || (top_score - second_best) < CLARIFICATION_MARGIN;

        let primary = Intent::build(top_type, top_score, complexity, text, needs_clarification);
        let alternatives: Vec<Intent> = ranked
            .iter()
            .skip(1)
            .take(MAX_ALTERNATIVES)
            .filter(|(_, score)| *score > 0.0)
            .map(|(t, s)| Intent::build(*t, *s, complexity, text, false))
            .collect();

        let clarification_questions = if needs_clarification {
            clarification_questions(top_type, alternatives.first().map(|i| i.task_type))
        } else {
            Vec::new()
        };

        ClassificationResult {
            confidence: primary.confidence,
            needs_clarification,
            clarification_questions,
            reasoning: format!(
                "pattern/context/feature weighted score selected {top_type:?} ({top_score:.2}) over {} alternative(s)",
                alternatives.len()
            ),
            primary,
            alternatives,
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}
