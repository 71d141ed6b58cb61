//! Price catalog and cost tracker: background model-price refresh and
//! per-call cost computation (C10).
//!
//! Shaped after the pricing module in a sibling example repo's gateway
//! client (`querymt`), which keeps a per-model price table refreshed from
//! the upstream's model list.

use crate::llm::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPrice {
    pub model_id: String,
    pub prompt_cost_per_million_tokens: f64,
    pub completion_cost_per_million_tokens: f64,
    pub context_length: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditBalance {
    pub limit: f64,
    pub usage: f64,
}

struct Inner {
    catalog: RwLock<HashMap<String, ModelPrice>>,
    transport: Arc<dyn PriceSource>,
}

/// Abstracts the HTTP calls needed to refresh prices/credits so the catalog
/// can be unit tested without a real transport.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_model_prices(&self) -> crate::error::GateResult<Vec<ModelPrice>>;
    async fn fetch_credit_balance(&self) -> crate::error::GateResult<CreditBalance>;
}

/// Maintains `modelId -> price` and refreshes it on a background interval.
pub struct PriceCatalog {
    inner: Arc<Inner>,
    refresh_handle: Option<JoinHandle<()>>,
}

impl PriceCatalog {
    pub fn new(
        transport: Arc<dyn PriceSource>,
        initial: Vec<ModelPrice>,
        refresh_interval: Duration,
    ) -> Self {
        let catalog = initial
            .into_iter()
            .map(|p| (p.model_id.clone(), p))
            .collect::<HashMap<_, _>>();
        let inner = Arc::new(Inner {
            catalog: RwLock::new(catalog),
            transport,
        });

        let refresh_handle = if refresh_interval.is_zero() {
            None
        } else {
            let inner = inner.clone();
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(refresh_interval);
                ticker.tick().await; // first tick fires immediately; skip
                loop {
                    ticker.tick().await;
                    match inner.transport.fetch_model_prices().await {
                        Ok(prices) => {
                            let mut catalog = inner.catalog.write().unwrap_or_else(|e| e.into_inner());
                            for price in prices {
                                catalog.insert(price.model_id.clone(), price);
                            }
                        }
                        Err(err) => crate::log(&format!("price catalog refresh failed: {err}")),
                    }
                }
            }))
        };

        Self {
            inner,
            refresh_handle,
        }
    }

    /// Fetches the initial catalog synchronously instead of waiting for the
    /// first background tick, used by the client façade at construction.
    pub async fn prime(&self) -> crate::error::GateResult<()> {
        let prices = self.inner.transport.fetch_model_prices().await?;
        let mut catalog = self.inner.catalog.write().unwrap_or_else(|e| e.into_inner());
        for price in prices {
            catalog.insert(price.model_id.clone(), price);
        }
        Ok(())
    }

    /// `None` when the catalog lacks the model. Rounded to 8 decimal places.
    pub fn compute_cost(&self, model_id: &str, usage: &TokenUsage) -> Option<f64> {
        let catalog = self.inner.catalog.read().unwrap_or_else(|e| e.into_inner());
        let price = catalog.get(model_id)?;
        let prompt_cost = usage.input_tokens as f64 * price.prompt_cost_per_million_tokens / 1_000_000.0;
        let completion_cost = usage.output_tokens as f64 * price.completion_cost_per_million_tokens / 1_000_000.0;
        let total = prompt_cost + completion_cost;
        Some((total * 1e8).round() / 1e8)
    }

    pub async fn get_credit_balance(&self) -> crate::error::GateResult<CreditBalance> {
        self.inner.transport.fetch_credit_balance().await
    }

    pub fn snapshot(&self) -> Vec<ModelPrice> {
        self.inner
            .catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.refresh_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for PriceCatalog {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource;

    #[async_trait::async_trait]
    impl PriceSource for FakeSource {
        async fn fetch_model_prices(&self) -> crate::error::GateResult<Vec<ModelPrice>> {
            Ok(vec![ModelPrice {
                model_id: "gpt-4o-mini".to_string(),
                prompt_cost_per_million_tokens: 0.15,
                completion_cost_per_million_tokens: 0.6,
                context_length: Some(128_000),
            }])
        }

        async fn fetch_credit_balance(&self) -> crate::error::GateResult<CreditBalance> {
            Ok(CreditBalance { limit: 100.0, usage: 1.5 })
        }
    }

    #[test]
    fn unknown_model_returns_none() {
        let catalog = PriceCatalog::new(Arc::new(FakeSource), Vec::new(), Duration::ZERO);
        assert!(catalog.compute_cost("unknown", &TokenUsage::default()).is_none());
    }

    #[test]
    fn cost_computation_matches_formula() {
        let initial = vec![ModelPrice {
            model_id: "m".to_string(),
            prompt_cost_per_million_tokens: 1.0,
            completion_cost_per_million_tokens: 2.0,
            context_length: None,
        }];
        let catalog = PriceCatalog::new(Arc::new(FakeSource), initial, Duration::ZERO);
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 500_000,
            cached_tokens: 0,
        };
        assert_eq!(catalog.compute_cost("m", &usage), Some(2.0));
    }

    #[tokio::test]
    async fn prime_loads_from_transport() {
        let catalog = PriceCatalog::new(Arc::new(FakeSource), Vec::new(), Duration::ZERO);
        catalog.prime().await.unwrap();
        assert!(catalog.compute_cost("gpt-4o-mini", &TokenUsage::default()).is_some());
    }
}
