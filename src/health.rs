//! Health prober for provider endpoints.
//!
//! Requests to an unhealthy provider fail fast with `ServiceUnavailable`
//! and never reach the wire — the Fallback Executor consults
//! [`HealthMonitor::is_model_healthy`] before every attempt.

use crate::models::Model;
use crate::providers::ProviderClient;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub struct ProviderHandle {
    pub name: String,
    pub client: Arc<dyn ProviderClient>,
    pub models: Vec<Model>,
    /// Per-request timeout this provider was configured with; the
    /// Fallback Executor bounds each attempt by `min(this, remaining
    /// deadline)` rather than a single hardcoded value.
    pub timeout: Duration,
    healthy: AtomicBool,
    last_check: RwLock<DateTime<Utc>>,
}

impl ProviderHandle {
    pub fn new(name: impl Into<String>, client: Arc<dyn ProviderClient>, models: Vec<Model>) -> Self {
        Self::with_timeout(name, client, models, Duration::from_secs(60))
    }

    pub fn with_timeout(name: impl Into<String>, client: Arc<dyn ProviderClient>, models: Vec<Model>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            client,
            models,
            timeout,
            healthy: AtomicBool::new(true),
            last_check: RwLock::new(Utc::now()),
        }
    }

    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", &self.name)
            .field("healthy", &self.healthy())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSnapshot {
    pub name: String,
    pub healthy: bool,
    pub models: Vec<Model>,
    pub last_check: DateTime<Utc>,
}

/// Owns the provider set and runs the periodic prober (default cadence 60s).
pub struct HealthMonitor {
    providers: Vec<Arc<ProviderHandle>>,
    by_model: HashMap<Model, Arc<ProviderHandle>>,
    check_interval: Duration,
}

impl HealthMonitor {
    pub fn new(providers: Vec<Arc<ProviderHandle>>, check_interval: Duration) -> Self {
        let mut by_model = HashMap::new();
        for handle in &providers {
            for model in &handle.models {
                by_model.insert(*model, handle.clone());
            }
        }
        Self { providers, by_model, check_interval }
    }

    pub fn provider_for_model(&self, model: Model) -> Option<Arc<ProviderHandle>> {
        self.by_model.get(&model).cloned()
    }

    pub fn is_model_healthy(&self, model: Model) -> bool {
        self.by_model.get(&model).map(|p| p.healthy()).unwrap_or(false)
    }

    pub async fn snapshot(&self) -> Vec<ProviderSnapshot> {
        let mut out = Vec::with_capacity(self.providers.len());
        for handle in &self.providers {
            out.push(ProviderSnapshot {
                name: handle.name.clone(),
                healthy: handle.healthy(),
                models: handle.models.clone(),
                last_check: *handle.last_check.read().await,
            });
        }
        out
    }

    async fn probe_once(&self) {
        for handle in &self.providers {
            let healthy = handle.client.ping().await;
            handle.healthy.store(healthy, Ordering::Relaxed);
            *handle.last_check.write().await = Utc::now();
            if !healthy {
                tracing::warn!(provider = %handle.name, "health probe failed");
            } else {
                tracing::debug!(provider = %handle.name, "health probe ok");
            }
        }
    }

    /// Spawns the background probe loop; returns a handle that can be
    /// aborted at shutdown.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.check_interval);
            loop {
                interval.tick().await;
                self.probe_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;
    use crate::models::{Message, ProviderResponse};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct StubProvider {
        healthy: bool,
    }

    #[async_trait]
    impl ProviderClient for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }
        async fn complete(&self, _model: Model, _messages: &[Message]) -> Result<ProviderResponse, RouterError> {
            unimplemented!()
        }
        async fn ping(&self) -> bool {
            self.healthy
        }
    }

    #[tokio::test]
    async fn unhealthy_provider_is_observed_after_probe() {
        let handle = Arc::new(ProviderHandle::new(
            "stub",
            Arc::new(StubProvider { healthy: false }),
            vec![Model::Mistral7B],
        ));
        let monitor = HealthMonitor::new(vec![handle], Duration::from_secs(60));
        assert!(monitor.is_model_healthy(Model::Mistral7B)); // optimistic until first probe
        monitor.probe_once().await;
        assert!(!monitor.is_model_healthy(Model::Mistral7B));
    }
}
