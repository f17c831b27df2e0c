use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Token counts for one priced unit of usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_5m_tokens: u64,
    pub cache_creation_1h_tokens: u64,
}

impl UsageSnapshot {
    pub fn from_counts(input: i64, output: i64, cache_create: i64, cache_read: i64) -> Self {
        Self {
            input_tokens: input.max(0) as u64,
            output_tokens: output.max(0) as u64,
            cache_create_tokens: cache_create.max(0) as u64,
            cache_read_tokens: cache_read.max(0) as u64,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_create_cost: f64,
    pub cache_read_cost: f64,
    pub ephemeral_5m_cost: f64,
    pub ephemeral_1h_cost: f64,
    pub total_cost: f64,
    pub has_pricing: bool,
}

/// Maps a model name and usage to a cost. A miss is not an error.
pub trait PricingLookup: Send + Sync {
    fn cost_of(&self, model: &str, usage: &UsageSnapshot) -> CostBreakdown;
}

/// Per-token prices, using the field names of the public litellm price sheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelPrice {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
    pub cache_creation_input_token_cost: f64,
    pub cache_read_input_token_cost: f64,
    pub cache_creation_input_token_cost_above_1hr: Option<f64>,
}

impl ModelPrice {
    fn cost(&self, usage: &UsageSnapshot) -> CostBreakdown {
        let input_cost = usage.input_tokens as f64 * self.input_cost_per_token;
        let output_cost = usage.output_tokens as f64 * self.output_cost_per_token;
        let cache_create_cost =
            usage.cache_create_tokens as f64 * self.cache_creation_input_token_cost;
        let cache_read_cost = usage.cache_read_tokens as f64 * self.cache_read_input_token_cost;
        let ephemeral_5m_cost =
            usage.cache_creation_5m_tokens as f64 * self.cache_creation_input_token_cost;
        let ephemeral_1h_cost = usage.cache_creation_1h_tokens as f64
            * self
                .cache_creation_input_token_cost_above_1hr
                .unwrap_or(self.cache_creation_input_token_cost);
        CostBreakdown {
            input_cost,
            output_cost,
            cache_create_cost,
            cache_read_cost,
            ephemeral_5m_cost,
            ephemeral_1h_cost,
            total_cost: input_cost
                + output_cost
                + cache_create_cost
                + cache_read_cost
                + ephemeral_5m_cost
                + ephemeral_1h_cost,
            has_pricing: true,
        }
    }
}

/// In-memory price table keyed by lowercase model name.
#[derive(Debug, Clone, Default)]
pub struct ModelPricingTable {
    prices: BTreeMap<String, ModelPrice>,
}

impl ModelPricingTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: &str, price: ModelPrice) {
        self.prices.insert(model.trim().to_ascii_lowercase(), price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Parses a `{ "<model>": { ...prices } }` object. Entries that are not
    /// price objects (e.g. a `sample_spec` header) are skipped.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let root: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)?;
        let mut table = Self::empty();
        for (model, value) in root {
            if !value.is_object() {
                continue;
            }
            match serde_json::from_value::<ModelPrice>(value) {
                Ok(price) => table.insert(&model, price),
                Err(e) => log::debug!("skip pricing entry {model}: {e}"),
            }
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&raw)?;
        log::info!("loaded {} model prices from {}", table.len(), path.display());
        Ok(table)
    }

    /// Exact name, then with a `vendor/` prefix stripped, then the longest
    /// table key the model extends by a release suffix only
    /// (`claude-sonnet-4-20250514`, `gpt-4o-2024-08-06`, `gpt-5-latest`).
    pub fn lookup(&self, model: &str) -> Option<&ModelPrice> {
        let name = model.trim().to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }
        if let Some(p) = self.prices.get(&name) {
            return Some(p);
        }
        let bare = name.rsplit('/').next().unwrap_or(&name);
        if let Some(p) = self.prices.get(bare) {
            return Some(p);
        }
        self.prices
            .iter()
            .filter(|(k, _)| {
                bare.strip_prefix(k.as_str())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .is_some_and(is_release_suffix)
            })
            .max_by_key(|(k, _)| k.len())
            .map(|(_, p)| p)
    }
}

/// `latest`, a compact date or snapshot number (`20250514`, `0613`), or `YYYY-MM-DD`.
fn is_release_suffix(rest: &str) -> bool {
    if rest == "latest" {
        return true;
    }
    if rest.len() >= 4 && rest.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    let parts: Vec<&str> = rest.split('-').collect();
    matches!(parts.as_slice(), [y, m, d]
        if y.len() == 4 && m.len() == 2 && d.len() == 2
            && parts.iter().all(|p| p.bytes().all(|b| b.is_ascii_digit())))
}

impl PricingLookup for ModelPricingTable {
    fn cost_of(&self, model: &str, usage: &UsageSnapshot) -> CostBreakdown {
        match self.lookup(model) {
            Some(price) => price.cost(usage),
            None => CostBreakdown::default(),
        }
    }
}
