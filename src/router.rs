//! Router: rule selector → constraint overrides → fallback
//! list, plus confidence and cost/time estimation.

use crate::capability::CapabilityRegistry;
use crate::config::RoutingStrategy;
use crate::metrics::SuccessRateTracker;
use crate::models::{
    AgentType, Complexity, Model, Priority, RouteDecision, TaskContext, TaskType, UserTier,
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const DECISION_LOG_CAP: usize = 100;

fn base_tokens(task_type: TaskType) -> u32 {
    match task_type {
        TaskType::DataExtraction => 400,
        TaskType::ContactScraping => 350,
        TaskType::CompanyResearch => 600,
        TaskType::JobSearch => 300,
        TaskType::FormFilling => 250,
        TaskType::Summarization => 500,
        TaskType::CustomWorkflow => 700,
        TaskType::GeneralQuery => 300,
    }
}

/// The capability dimension a `TaskContext` is judged against for
/// confidence scoring.
fn dominant_dimension(ctx: &TaskContext, cap: &crate::models::CapabilityVector) -> u8 {
    match (ctx.task_type, ctx.agent_type) {
        (_, Some(AgentType::Navigator)) | (TaskType::FormFilling, _) => cap.navigation,
        (_, Some(AgentType::Planner)) | (TaskType::CustomWorkflow, _) => cap.planning,
        (_, Some(AgentType::Extractor))
        | (TaskType::DataExtraction, _)
        | (TaskType::ContactScraping, _) => cap.extraction,
        (TaskType::CompanyResearch, _) => cap.extraction,
        (_, Some(AgentType::Verifier)) | (TaskType::Summarization, _) => cap.summarization,
        _ => cap.reasoning,
    }
}

pub struct Router {
    registry: Arc<CapabilityRegistry>,
    success_rates: Arc<SuccessRateTracker>,
    strategy: RoutingStrategy,
    decision_log: DashMap<(TaskType, Option<AgentType>, Complexity), VecDeque<String>>,
}

impl Router {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        success_rates: Arc<SuccessRateTracker>,
        strategy: RoutingStrategy,
    ) -> Self {
        Self {
            registry,
            success_rates,
            strategy,
            decision_log: DashMap::new(),
        }
    }

    /// Produces a `RouteDecision` for `ctx`. Deterministic: identical
    /// `TaskContext`s against identical registry state always yield equal
    /// `(primary, fallbacks)`.
    pub fn route(&self, ctx: &TaskContext) -> RouteDecision {
        let (mut primary, mut rationale) = self.select_by_rule(ctx);

        // Constraint overrides, in fixed priority order: a
        // budget override beats a time override, which beats tier, which
        // beats priority. Each only applies if no earlier one already fired.
        if ctx.budget_limit.is_some_and(|b| b < 0.01) {
            primary = Model::Mistral7B;
            rationale = "budget override: < $0.01 limit".to_string();
        } else if ctx.time_limit.is_some_and(|t| t < Duration::from_secs(30)) {
            primary = Model::NemoRetriever;
            rationale = "time override: < 30s limit".to_string();
        } else if ctx.user_tier == UserTier::Enterprise {
            primary = Model::Claude35Sonnet;
            rationale = "enterprise tier override".to_string();
        } else if ctx.priority == Priority::Urgent {
            primary = Model::Mistral7B;
            rationale = "urgent priority override".to_string();
        }

        // Alert engine `disable_model` action: a disabled
        // model is never handed out as a primary pick, even if the rule/
        // override chain selected it. Substitute the next-best enabled
        // model by reliability rather than surfacing an error here — the
        // Fallback Executor still re-checks health/breaker state per attempt.
        if !self.registry.is_enabled(primary) {
            if let Some(substitute) = self.best_enabled_substitute(primary) {
                rationale = format!("{rationale} ({primary} disabled, substituted {substitute})");
                primary = substitute;
            }
        }

        let fallbacks = self.build_fallbacks(primary, ctx);
        let confidence = self.confidence(primary, ctx);
        let (est_cost, est_time) = self.estimate(primary, ctx);

        let decision = RouteDecision {
            primary,
            fallbacks,
            rationale,
            confidence,
            est_cost,
            est_time,
        };

        self.log_decision(ctx, &decision);
        decision
    }

    fn select_by_rule(&self, ctx: &TaskContext) -> (Model, String) {
        use AgentType::*;
        use TaskType::*;

        if ctx.agent_type == Some(Navigator) && ctx.complexity == Complexity::High {
            return (Model::DeepseekCoder, "rule: code generation".to_string());
        }

        if ctx.task_type == FormFilling || ctx.agent_type == Some(Navigator) {
            return (Model::Mistral7B, "rule: navigation/form-filling".to_string());
        }

        if ctx.agent_type == Some(Planner)
            || ctx.task_type == CustomWorkflow
            || (ctx.task_type == CompanyResearch && ctx.complexity == Complexity::High)
        {
            return (Model::Llama70B, "rule: planning/multi-step".to_string());
        }

        if ctx.agent_type == Some(Extractor)
            || matches!(ctx.task_type, DataExtraction | ContactScraping)
            || (ctx.task_type == CompanyResearch && ctx.complexity == Complexity::Low)
        {
            return (Model::NemoRetriever, "rule: factual retrieval".to_string());
        }

        if ctx.task_type == Summarization || ctx.agent_type == Some(Verifier) {
            let model = if ctx.complexity == Complexity::High { Model::Mixtral8x7B } else { Model::Llama8B };
            return (model, "rule: summary/report".to_string());
        }

        (Model::Llama8B, "rule: default general assistant".to_string())
    }

    /// The next-best enabled model by `reliability`, excluding `excluded`
    /// itself — used both when the primary pick is disabled and when a
    /// fallback slot candidate turns out to be disabled.
    fn best_enabled_substitute(&self, excluded: Model) -> Option<Model> {
        Model::all()
            .iter()
            .copied()
            .filter(|m| *m != excluded && self.registry.is_enabled(*m))
            .max_by_key(|m| self.registry.capabilities(*m).map(|c| c.reliability).unwrap_or(0))
    }

    /// Two-slot fallback list. When the priority-gated
    /// `CLAUDE_3_5_SONNET` slot collides with the primary, the next
    /// highest-capability model not already in the chain fills the slot
    /// instead of skipping straight to `LLAMA_8B`, so a premium/urgent
    /// chain never downgrades to the entry-level model on its first hop.
    /// Disabled models are never placed in the
    /// fallback list either.
    fn build_fallbacks(&self, primary: Model, ctx: &TaskContext) -> Vec<Model> {
        let mut fallbacks = Vec::with_capacity(2);

        if primary != Model::Mistral7B && self.registry.is_enabled(Model::Mistral7B) {
            fallbacks.push(Model::Mistral7B);
        }

        if matches!(ctx.priority, Priority::High | Priority::Urgent) && fallbacks.len() < 2 {
            for candidate in [Model::Claude35Sonnet, Model::Gpt4o, Model::Mixtral8x7B] {
                if candidate != primary && !fallbacks.contains(&candidate) && self.registry.is_enabled(candidate) {
                    fallbacks.push(candidate);
                    break;
                }
            }
        }

        if fallbacks.len() < 2
            && primary != Model::Llama8B
            && !fallbacks.contains(&Model::Llama8B)
            && self.registry.is_enabled(Model::Llama8B)
        {
            fallbacks.push(Model::Llama8B);
        }

        if fallbacks.len() < 2 {
            if let Some(extra) = self.best_enabled_substitute(primary) {
                if !fallbacks.contains(&extra) {
                    fallbacks.push(extra);
                }
            }
        }

        fallbacks.truncate(2);
        fallbacks
    }

    fn confidence(&self, primary: Model, ctx: &TaskContext) -> u8 {
        let cap = match self.registry.capabilities(primary) {
            Some(cap) => cap,
            None => return 50,
        };
        let dimension_score = dominant_dimension(ctx, &cap) as f64;
        let rule_confidence = (dimension_score + cap.reliability as f64) / 2.0;
        let observed = self.success_rates.rate(primary).unwrap_or(75.0);
        (((rule_confidence + observed) / 2.0).round() as i64).clamp(0, 100) as u8
    }

    /// Per-model cost estimate, exposed so the Fallback Executor can
    /// re-check the hard budget ceiling against each candidate in the
    /// chain, not just the router's chosen primary.
    pub fn estimate_cost(&self, model: Model, ctx: &TaskContext) -> f64 {
        self.estimate(model, ctx).0
    }

    fn estimate(&self, primary: Model, ctx: &TaskContext) -> (f64, Duration) {
        let cap = self.registry.capabilities(primary).unwrap_or(crate::models::CapabilityVector {
            planning: 50,
            navigation: 50,
            extraction: 50,
            reasoning: 50,
            coding: 50,
            summarization: 50,
            speed: 50,
            reliability: 50,
            cost: 0.002,
            context_length: 8_000,
        });

        let tokens = base_tokens(ctx.task_type) as f64 * ctx.complexity.multiplier()
            + ctx.context_size.unwrap_or(0) as f64;
        let est_cost = (tokens / 1000.0) * cap.cost;
        let est_time = Duration::from_secs_f64(tokens / (cap.speed.max(1) as f64));
        (est_cost, est_time)
    }

    /// Only consulted when two candidates are otherwise equally
    /// confident — the rule selector itself never calls this.
    pub fn resolve_ties(&self, candidates: &[Model], strategy: RoutingStrategy) -> Option<Model> {
        match strategy {
            RoutingStrategy::Cost => candidates
                .iter()
                .min_by(|a, b| {
                    let ca = self.registry.capabilities(**a).map(|c| c.cost).unwrap_or(f64::MAX);
                    let cb = self.registry.capabilities(**b).map(|c| c.cost).unwrap_or(f64::MAX);
                    ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
                })
                .copied(),
            RoutingStrategy::Performance => candidates
                .iter()
                .max_by_key(|m| self.registry.capabilities(**m).map(|c| c.speed).unwrap_or(0))
                .copied(),
            RoutingStrategy::Quality => candidates
                .iter()
                .max_by_key(|m| self.registry.capabilities(**m).map(|c| c.reliability).unwrap_or(0))
                .copied(),
            RoutingStrategy::Balanced => candidates.first().copied(),
        }
    }

    fn log_decision(&self, ctx: &TaskContext, decision: &RouteDecision) {
        let key = (ctx.task_type, ctx.agent_type, ctx.complexity);
        let mut entry = self.decision_log.entry(key).or_insert_with(VecDeque::new);
        entry.push_back(format!("{} -> {}", decision.rationale, decision.primary));
        while entry.len() > DECISION_LOG_CAP {
            entry.pop_front();
        }
    }

    pub fn decision_history(&self, ctx: &TaskContext) -> Vec<String> {
        let key = (ctx.task_type, ctx.agent_type, ctx.complexity);
        self.decision_log.get(&key).map(|v| v.iter().cloned().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_router() -> Router {
        Router::new(
            Arc::new(CapabilityRegistry::new()),
            Arc::new(SuccessRateTracker::new()),
            RoutingStrategy::Balanced,
        )
    }

    #[test]
    fn navigator_low_fast_path() {
        let router = make_router();
        let ctx = TaskContext::new(TaskType::FormFilling, Complexity::Low, Priority::Medium, UserTier::Premium)
            .with_agent_type(AgentType::Navigator);
        let decision = router.route(&ctx);
        assert!(matches!(decision.primary, Model::Mistral7B | Model::Llama8B));
        assert!(decision.confidence >= 60);
        assert!(decision.est_cost < 0.01);
        assert!(decision.fallbacks.len() <= 2);
        assert!(!decision.fallbacks.contains(&decision.primary));
    }

    #[test]
    fn enterprise_planning() {
        let router = make_router();
        let ctx = TaskContext::new(TaskType::CustomWorkflow, Complexity::High, Priority::High, UserTier::Enterprise)
            .with_agent_type(AgentType::Planner);
        let decision = router.route(&ctx);
        assert!(matches!(decision.primary, Model::Llama70B | Model::Claude35Sonnet));
        assert!(decision.confidence >= 70);
        assert!(decision
            .fallbacks
            .iter()
            .any(|m| matches!(m, Model::Mixtral8x7B | Model::Gpt4o | Model::Claude35Sonnet)));
    }

    #[test]
    fn budget_override_forces_mistral_regardless_of_task() {
        let router = make_router();
        let ctx = TaskContext::new(TaskType::DataExtraction, Complexity::Low, Priority::Low, UserTier::Free)
            .with_agent_type(AgentType::Extractor)
            .with_budget_limit(0.009);
        let decision = router.route(&ctx);
        assert_eq!(decision.primary, Model::Mistral7B);
    }

    #[test]
    fn time_override_beats_enterprise_tier() {
        let router = make_router();
        let mut ctx = TaskContext::new(TaskType::CompanyResearch, Complexity::High, Priority::Medium, UserTier::Enterprise);
        ctx.time_limit = Some(Duration::from_secs(29));
        let decision = router.route(&ctx);
        assert_eq!(decision.primary, Model::NemoRetriever);
    }

    #[test]
    fn budget_case_scenario_six() {
        let router = make_router();
        let ctx = TaskContext::new(TaskType::DataExtraction, Complexity::Low, Priority::Low, UserTier::Free)
            .with_agent_type(AgentType::Extractor)
            .with_budget_limit(0.005);
        let decision = router.route(&ctx);
        assert!(matches!(decision.primary, Model::Mistral7B | Model::NemoRetriever));
        assert!(decision.est_cost < 0.01);
    }

    #[test]
    fn disabled_primary_is_substituted() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.set_enabled(Model::Mistral7B, false);
        let router = Router::new(registry, Arc::new(SuccessRateTracker::new()), RoutingStrategy::Balanced);
        let ctx = TaskContext::new(TaskType::FormFilling, Complexity::Low, Priority::Medium, UserTier::Premium)
            .with_agent_type(AgentType::Navigator);
        let decision = router.route(&ctx);
        assert_ne!(decision.primary, Model::Mistral7B);
        assert!(!decision.fallbacks.contains(&Model::Mistral7B));
    }

    #[test]
    fn routing_is_deterministic() {
        let router = make_router();
        let ctx = TaskContext::new(TaskType::JobSearch, Complexity::Medium, Priority::Medium, UserTier::Free);
        let d1 = router.route(&ctx);
        let d2 = router.route(&ctx);
        assert_eq!(d1.primary, d2.primary);
        assert_eq!(d1.fallbacks, d2.fallbacks);
    }

    #[test]
    fn fallback_never_contains_primary() {
        let router = make_router();
        for task in TaskType::patterned() {
            for complexity in [Complexity::Low, Complexity::Medium, Complexity::High] {
                let ctx = TaskContext::new(*task, complexity, Priority::Urgent, UserTier::Free);
                let decision = router.route(&ctx);
                assert!(!decision.fallbacks.contains(&decision.primary));
                assert!(decision.fallbacks.len() <= 2);
            }
        }
    }
}
