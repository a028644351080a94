//! Per-model token pricing.
//!
//! Prices are in USD per 1 million tokens. Providers answer with dated model
//! names (`gpt-4o-2024-05-13`), so lookups fall back to the longest known
//! model name that prefixes the requested one.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use hash_ai_config::TelemetryConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) * self.input_per_m
            + f64::from(output_tokens) * self.output_per_m)
            / 1_000_000.0
    }
}

/// Thread-safe pricing table with built-in defaults and overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    pub fn with_defaults() -> Self {
        let defaults = [
            ("gpt-4o", 5.0, 15.0),
            ("gpt-4-turbo", 10.0, 30.0),
            ("gpt-4-1106-preview", 10.0, 30.0),
            ("gpt-3.5-turbo", 0.5, 1.5),
            ("claude-3-opus", 15.0, 75.0),
            ("claude-3-sonnet", 3.0, 15.0),
            ("claude-3-haiku", 0.25, 1.25),
            ("claude-3-5-sonnet", 3.0, 15.0),
        ];

        let prices = defaults
            .into_iter()
            .map(|(model, input, output)| (model.to_string(), ModelPricing::new(input, output)))
            .collect();

        Self {
            prices: RwLock::new(prices),
        }
    }

    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Defaults plus the `custom_pricing` overrides from configuration.
    pub fn from_config(config: &TelemetryConfig) -> Self {
        let table = Self::with_defaults();
        for (model, pricing) in &config.custom_pricing {
            table.set(model, ModelPricing::new(pricing.input_per_m, pricing.output_per_m));
        }
        table
    }

    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.into(), pricing);
    }

    /// Exact match, else the longest known name that prefixes `model`.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(pricing) = prices.get(model) {
            return Some(*pricing);
        }

        let model = model.to_lowercase();
        prices
            .iter()
            .filter(|(known, _)| model.starts_with(&known.to_lowercase()))
            .max_by_key(|(known, _)| known.len())
            .map(|(_, pricing)| *pricing)
    }

    /// Cost of a call, or `None` when the model has no price.
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> Option<f64> {
        self.get(model).map(|pricing| pricing.cost(input_tokens, output_tokens))
    }

    /// Known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hash_ai_config::PricingOverrideConfig;

    #[test]
    fn known_model_cost() {
        let table = PricingTable::with_defaults();
        // (1000 * 15 + 500 * 75) / 1M
        let cost = table.compute_cost("claude-3-opus", 1000, 500).unwrap();
        assert!((cost - 0.0525).abs() < 1e-10);
    }

    #[test]
    fn dated_names_use_longest_prefix() {
        let table = PricingTable::with_defaults();
        let haiku = table.get("claude-3-haiku-20240307").unwrap();
        assert_eq!(haiku, ModelPricing::new(0.25, 1.25));

        let sonnet_35 = table.get("claude-3-5-sonnet-20240620").unwrap();
        assert_eq!(sonnet_35, ModelPricing::new(3.0, 15.0));

        assert_eq!(table.get("gpt-4o-2024-05-13").unwrap(), ModelPricing::new(5.0, 15.0));
        assert_eq!(table.get("gpt-4-turbo-preview").unwrap(), ModelPricing::new(10.0, 30.0));
    }

    #[test]
    fn unknown_model_has_no_cost() {
        let table = PricingTable::with_defaults();
        assert!(table.compute_cost("llama-3-70b", 1000, 500).is_none());
    }

    #[test]
    fn overrides_from_config() {
        let mut config = TelemetryConfig::default();
        config.custom_pricing.insert(
            "gpt-4o".into(),
            PricingOverrideConfig {
                input_per_m: 2.5,
                output_per_m: 10.0,
            },
        );
        config.custom_pricing.insert(
            "in-house".into(),
            PricingOverrideConfig {
                input_per_m: 1.0,
                output_per_m: 2.0,
            },
        );

        let table = PricingTable::from_config(&config);
        assert!((table.compute_cost("gpt-4o", 1_000_000, 0).unwrap() - 2.5).abs() < 1e-10);
        let cost = table.compute_cost("in-house", 1_000_000, 1_000_000).unwrap();
        assert!((cost - 3.0).abs() < 1e-10);
    }

    #[test]
    fn models_are_sorted() {
        let table = PricingTable::with_defaults();
        let models = table.models();
        assert_eq!(models.len(), table.len());
        assert!(models.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn empty_table() {
        let table = PricingTable::empty();
        assert!(table.is_empty());
        table.set("m", ModelPricing::new(1.0, 1.0));
        assert_eq!(table.len(), 1);
    }
}
