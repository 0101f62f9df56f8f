//! Capability Registry: a pure lookup from [`Model`] to [`CapabilityVector`],
//! plus the one piece of mutable state allowed here — the `enabled`
//! flag the Alert engine flips.
//!
//! Reads are lock-free via `ArcSwap` instead of a per-request lock; the
//! only writer is `disable_model`/`enable_model`, serialized by virtue of
//! `ArcSwap::rcu`.

use crate::models::{CapabilityVector, Model};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct ModelState {
    pub capabilities: CapabilityVector,
    pub enabled: bool,
}

#[derive(Debug)]
pub struct CapabilityRegistry {
    table: ArcSwap<HashMap<Model, ModelState>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(Self::default_table()),
        }
    }

    /// Pure lookup: `lookup(m)` equals `lookup(m)` across calls.
    pub fn lookup(&self, model: Model) -> Option<ModelState> {
        self.table.load().get(&model).copied()
    }

    pub fn is_enabled(&self, model: Model) -> bool {
        self.lookup(model).map(|s| s.enabled).unwrap_or(false)
    }

    pub fn capabilities(&self, model: Model) -> Option<CapabilityVector> {
        self.lookup(model).map(|s| s.capabilities)
    }

    pub fn all_enabled(&self) -> Vec<Model> {
        self.table
            .load()
            .iter()
            .filter(|(_, state)| state.enabled)
            .map(|(model, _)| *model)
            .collect()
    }

    /// Only writer of registry state.
    pub fn set_enabled(&self, model: Model, enabled: bool) {
        self.table.rcu(|table| {
            let mut next = HashMap::clone(table);
            if let Some(state) = next.get_mut(&model) {
                state.enabled = enabled;
            }
            next
        });
    }

    fn default_table() -> HashMap<Model, ModelState> {
        use Model::*;
        let mut table = HashMap::new();
        let mut insert = |model: Model, cap: CapabilityVector| {
            table.insert(model, ModelState { capabilities: cap, enabled: true });
        };

        insert(
            Mistral7B,
            CapabilityVector {
                planning: 35,
                navigation: 80,
                extraction: 55,
                reasoning: 40,
                coding: 35,
                summarization: 50,
                speed: 90,
                reliability: 80,
                cost: 0.0005,
                context_length: 8_000,
            },
        );
        insert(
            Llama8B,
            CapabilityVector {
                planning: 45,
                navigation: 50,
                extraction: 55,
                reasoning: 55,
                coding: 45,
                summarization: 70,
                speed: 80,
                reliability: 80,
                cost: 0.0008,
                context_length: 8_000,
            },
        );
        insert(
            Llama70B,
            CapabilityVector {
                planning: 85,
                navigation: 55,
                extraction: 65,
                reasoning: 80,
                coding: 65,
                summarization: 75,
                speed: 45,
                reliability: 85,
                cost: 0.006,
                context_length: 32_000,
            },
        );
        insert(
            NemoRetriever,
            CapabilityVector {
                planning: 30,
                navigation: 40,
                extraction: 90,
                reasoning: 50,
                coding: 20,
                summarization: 55,
                speed: 85,
                reliability: 85,
                cost: 0.0004,
                context_length: 4_000,
            },
        );
        insert(
            DeepseekCoder,
            CapabilityVector {
                planning: 50,
                navigation: 35,
                extraction: 40,
                reasoning: 70,
                coding: 95,
                summarization: 35,
                speed: 60,
                reliability: 80,
                cost: 0.002,
                context_length: 16_000,
            },
        );
        insert(
            CodeLlama,
            CapabilityVector {
                planning: 35,
                navigation: 30,
                extraction: 35,
                reasoning: 55,
                coding: 80,
                summarization: 30,
                speed: 70,
                reliability: 78,
                cost: 0.001,
                context_length: 16_000,
            },
        );
        insert(
            Mixtral8x7B,
            CapabilityVector {
                planning: 70,
                navigation: 50,
                extraction: 60,
                reasoning: 75,
                coding: 60,
                summarization: 85,
                speed: 55,
                reliability: 82,
                cost: 0.003,
                context_length: 32_000,
            },
        );
        insert(
            Claude35Sonnet,
            CapabilityVector {
                planning: 90,
                navigation: 75,
                extraction: 85,
                reasoning: 92,
                coding: 88,
                summarization: 90,
                speed: 65,
                reliability: 95,
                cost: 0.015,
                context_length: 200_000,
            },
        );
        insert(
            Gpt4o,
            CapabilityVector {
                planning: 88,
                navigation: 70,
                extraction: 82,
                reasoning: 90,
                coding: 85,
                summarization: 88,
                speed: 70,
                reliability: 93,
                cost: 0.01,
                context_length: 128_000,
            },
        );

        table
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_pure() {
        let registry = CapabilityRegistry::new();
        let first = registry.lookup(Model::Mistral7B);
        let second = registry.lookup(Model::Mistral7B);
        assert_eq!(first.unwrap().capabilities.speed, second.unwrap().capabilities.speed);
    }

    #[test]
    fn disable_model_is_observed_by_lookup() {
        let registry = CapabilityRegistry::new();
        assert!(registry.is_enabled(Model::Llama70B));
        registry.set_enabled(Model::Llama70B, false);
        assert!(!registry.is_enabled(Model::Llama70B));
    }

    #[test]
    fn every_model_has_an_entry() {
        let registry = CapabilityRegistry::new();
        for model in Model::all() {
            assert!(registry.lookup(*model).is_some(), "missing entry for {model}");
        }
    }
}
