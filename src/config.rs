//! Immutable configuration snapshot. Built once at startup via [`RouterConfig::from_env`]
//! or [`RouterConfig::default`], then handed to every component by value —
//! nothing in this crate mutates a `RouterConfig` after construction.

use crate::error::RouterError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    Cost,
    Performance,
    Quality,
    Balanced,
}

#[derive(Debug, Clone)]
pub struct ProviderEndpointConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub strategy: RoutingStrategy,
}

#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    pub health_check_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub max_retry_attempts: u32,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub min_success_rate: f64,
    pub max_single_attempt_time: Duration,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self { min_success_rate: 50.0, max_single_attempt_time: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub providers: Vec<ProviderEndpointConfig>,
    pub routing: RoutingConfig,
    pub performance: PerformanceConfig,
    pub fallback: FallbackConfig,
    pub alert_thresholds: AlertThresholds,
    pub context_message_cap: usize,
    pub context_ttl: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderEndpointConfig {
                    name: "ollama".to_string(),
                    base_url: "http://localhost:11434".to_string(),
                    api_key: None,
                    timeout: Duration::from_secs(30),
                },
                ProviderEndpointConfig {
                    name: "lm_studio".to_string(),
                    base_url: "http://localhost:1234".to_string(),
                    api_key: None,
                    timeout: Duration::from_secs(30),
                },
                ProviderEndpointConfig {
                    name: "openai".to_string(),
                    base_url: "https://api.openai.com".to_string(),
                    api_key: None,
                    timeout: Duration::from_secs(60),
                },
                ProviderEndpointConfig {
                    name: "anthropic".to_string(),
                    base_url: "https://api.anthropic.com".to_string(),
                    api_key: None,
                    timeout: Duration::from_secs(60),
                },
            ],
            routing: RoutingConfig { strategy: RoutingStrategy::Balanced },
            performance: PerformanceConfig { health_check_interval: Duration::from_secs(60) },
            fallback: FallbackConfig {
                max_retry_attempts: 3,
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
                base_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(30),
            },
            alert_thresholds: AlertThresholds {
                min_success_rate: 50.0,
                max_single_attempt_time: Duration::from_secs(30),
            },
            context_message_cap: 100,
            context_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RouterConfig {
    /// Overlays environment variables on top of [`RouterConfig::default`]:
    /// `OLLAMA_URL`, `LM_STUDIO_URL`, `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("OLLAMA_URL") {
            if let Some(p) = config.providers.iter_mut().find(|p| p.name == "ollama") {
                p.base_url = url;
            }
        }
        if let Ok(url) = std::env::var("LM_STUDIO_URL") {
            if let Some(p) = config.providers.iter_mut().find(|p| p.name == "lm_studio") {
                p.base_url = url;
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if let Some(p) = config.providers.iter_mut().find(|p| p.name == "openai") {
                p.api_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if let Some(p) = config.providers.iter_mut().find(|p| p.name == "anthropic") {
                p.api_key = Some(key);
            }
        }

        config
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        if self.providers.is_empty() {
            return Err(RouterError::ConfigError("no providers configured".to_string()));
        }
        for provider in &self.providers {
            if provider.timeout < Duration::from_secs(10) {
                return Err(RouterError::ConfigError(format!(
                    "{}: timeout must be at least 10s",
                    provider.name
                )));
            }
            if matches!(provider.name.as_str(), "openai" | "anthropic") && provider.api_key.is_none() {
                tracing::warn!(provider = %provider.name, "no api key configured, requests will fail authentication");
            }
        }
        if self.context_message_cap == 0 {
            return Err(RouterError::ConfigError("context_message_cap must be positive".to_string()));
        }
        if self.fallback.max_retry_attempts == 0 {
            return Err(RouterError::ConfigError("fallback.max_retry_attempts must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(RouterConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = RouterConfig::default();
        config.providers[0].timeout = Duration::from_secs(1);
        assert!(matches!(config.validate(), Err(RouterError::ConfigError(_))));
    }

    #[test]
    fn empty_providers_is_rejected() {
        let mut config = RouterConfig::default();
        config.providers.clear();
        assert!(matches!(config.validate(), Err(RouterError::ConfigError(_))));
    }
}
