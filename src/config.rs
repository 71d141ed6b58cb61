//! Client configuration surface (spec.md §6 "Config surface").

use crate::history::HistoryAdapterConfig;
use crate::security::SecurityConfig;
use std::time::Duration;

/// Proxy configuration threaded untouched to the HTTP layer.
#[derive(Debug, Clone)]
pub enum ProxyConfig {
    Url(String),
    Parts {
        host: String,
        port: u16,
        user: Option<String>,
        pass: Option<String>,
    },
}

/// Requested response shape for the completion endpoint.
#[derive(Debug, Clone, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Everything the client façade needs to construct its collaborators.
///
/// Mirrors the teacher's `ProviderConfig` in shape (plain struct + fluent
/// builder methods), generalized to the gateway client's wider surface.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub api_endpoint: String,
    pub timeout: Duration,
    pub proxy: Option<ProxyConfig>,
    pub referer: Option<String>,
    pub title: Option<String>,

    pub history_adapter: HistoryAdapterConfig,
    pub history_ttl: Option<Duration>,
    pub history_cleanup_interval: Option<Duration>,
    pub max_history_entries: Option<usize>,

    pub max_tool_calls: u32,
    pub model_fallbacks: Vec<String>,
    pub response_format: ResponseFormat,
    pub strict_json_parsing: bool,
    pub parallel_tool_calls: bool,

    pub security: SecurityConfig,

    pub enable_cost_tracking: bool,
    pub price_refresh_interval: Duration,
    pub initial_model_prices: Vec<crate::pricing::ModelPrice>,

    pub debug: bool,
}

impl Config {
    /// `api_key` and `model` are the only fields a caller must provide;
    /// everything else takes the spec's stated defaults.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_endpoint: "https://openrouter.ai/api/v1".to_string(),
            timeout: Duration::from_secs(120),
            proxy: None,
            referer: None,
            title: None,
            history_adapter: HistoryAdapterConfig::Memory,
            history_ttl: None,
            history_cleanup_interval: None,
            max_history_entries: None,
            max_tool_calls: 10,
            model_fallbacks: Vec::new(),
            response_format: ResponseFormat::Text,
            strict_json_parsing: false,
            parallel_tool_calls: false,
            security: SecurityConfig::default(),
            enable_cost_tracking: false,
            price_refresh_interval: Duration::from_secs(6 * 60 * 60),
            initial_model_prices: Vec::new(),
            debug: false,
        }
    }

    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tool_calls(mut self, max: u32) -> Self {
        self.max_tool_calls = max;
        self
    }

    pub fn with_model_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.model_fallbacks = fallbacks;
        self
    }

    pub fn with_history_adapter(mut self, adapter: HistoryAdapterConfig) -> Self {
        self.history_adapter = adapter;
        self
    }

    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    pub fn with_cost_tracking(mut self, enabled: bool) -> Self {
        self.enable_cost_tracking = enabled;
        self
    }

    /// Update configuration in place via a closure, mirroring the teacher's
    /// `update_config(f: impl FnOnce(&mut ProviderConfig))`.
    pub fn update(&mut self, f: impl FnOnce(&mut Self)) {
        f(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::new("key", "gpt-4o-mini");
        assert_eq!(cfg.max_tool_calls, 10);
        assert_eq!(cfg.timeout, Duration::from_secs(120));
        assert!(!cfg.enable_cost_tracking);
    }

    #[test]
    fn builder_methods_chain() {
        let cfg = Config::new("key", "m")
            .with_max_tool_calls(3)
            .with_model_fallbacks(vec!["backup".to_string()]);
        assert_eq!(cfg.max_tool_calls, 3);
        assert_eq!(cfg.model_fallbacks, vec!["backup".to_string()]);
    }
}
