//! Per-model token pricing

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{Result, SonarError, TokenUsage};

const PER_MILLION: f64 = 1_000_000.0;

/// Prices in USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_creation: f64,
}

impl ModelPricing {
    pub const OPUS: Self = Self {
        input: 15.0,
        output: 75.0,
        cache_read: 1.5,
        cache_creation: 18.75,
    };

    pub const SONNET: Self = Self {
        input: 3.0,
        output: 15.0,
        cache_read: 0.3,
        cache_creation: 3.75,
    };

    pub const HAIKU: Self = Self {
        input: 0.25,
        output: 1.25,
        cache_read: 0.025,
        cache_creation: 0.3125,
    };

    /// Cost of `tokens` at these prices
    pub fn cost(&self, tokens: &TokenUsage) -> f64 {
        (tokens.input_tokens as f64 / PER_MILLION) * self.input
            + (tokens.output_tokens as f64 / PER_MILLION) * self.output
            + (tokens.cache_read_input_tokens as f64 / PER_MILLION) * self.cache_read
            + (tokens.cache_creation_input_tokens as f64 / PER_MILLION) * self.cache_creation
    }

    fn validate(&self, name: &str) -> Result<()> {
        let all = [self.input, self.output, self.cache_read, self.cache_creation];
        if all.iter().all(|p| p.is_finite() && *p >= 0.0) {
            Ok(())
        } else {
            Err(SonarError::config_error(format!(
                "pricing for {name:?} must be finite and non-negative"
            )))
        }
    }
}

/// Tier matched by substring of the model name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    /// Substring looked up in the lowercased model name
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(flatten)]
    pub pricing: ModelPricing,
}

/// Ordered pricing tiers with a fallback
///
/// The first tier whose pattern is contained in the model name wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    pub models: Vec<PricingTier>,
    pub default: ModelPricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PricingTable {
    /// Built-in opus / sonnet / haiku tiers, sonnet as fallback
    pub fn builtin() -> Self {
        let tier = |pattern: &str, pricing| PricingTier {
            pattern: pattern.to_string(),
            pricing,
        };
        Self {
            models: vec![
                tier("opus", ModelPricing::OPUS),
                tier("sonnet", ModelPricing::SONNET),
                tier("haiku", ModelPricing::HAIKU),
            ],
            default: ModelPricing::SONNET,
        }
    }

    /// Parse a table from JSON
    ///
    /// ```json
    /// {
    ///   "models": [{ "match": "opus", "input": 15, "output": 75 }],
    ///   "default": { "input": 3, "output": 15 }
    /// }
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(json)?;
        for tier in &table.models {
            if tier.pattern.trim().is_empty() {
                return Err(SonarError::config_error("pricing tier with empty match"));
            }
            tier.pricing.validate(&tier.pattern)?;
        }
        table.default.validate("default")?;
        Ok(table)
    }

    /// Load a table from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SonarError::config_error(format!("cannot read pricing file {}: {e}", path.display()))
        })?;
        let table = Self::from_json_str(&content)?;
        tracing::info!(
            path = %path.display(),
            tiers = table.models.len(),
            "Loaded pricing table"
        );
        Ok(table)
    }

    /// Pricing for a model name
    pub fn lookup(&self, model: &str) -> &ModelPricing {
        let model = model.to_ascii_lowercase();
        self.models
            .iter()
            .find(|tier| model.contains(&tier.pattern.to_ascii_lowercase()))
            .map_or(&self.default, |tier| &tier.pricing)
    }

    /// Cost of `tokens` for `model`
    pub fn cost(&self, tokens: &TokenUsage, model: &str) -> f64 {
        self.lookup(model).cost(tokens)
    }
}
