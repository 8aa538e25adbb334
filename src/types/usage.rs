//! Token usage accounting, extended beyond the teacher's `Usage` struct with
//! cache-read/cache-creation counters and a per-model price table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_creation_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_creation_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
    }
}

/// Per-million-token pricing for a single model, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_read_per_mtok: f64,
    pub cache_write_per_mtok: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.prices.insert(model.into(), price);
    }

    pub fn cost_usd(&self, model: &str, usage: &Usage) -> Option<f64> {
        let p = self.prices.get(model)?;
        let cost = (usage.input_tokens as f64 / 1_000_000.0) * p.input_per_mtok
            + (usage.output_tokens as f64 / 1_000_000.0) * p.output_per_mtok
            + (usage.cache_read_tokens as f64 / 1_000_000.0) * p.cache_read_per_mtok
            + (usage.cache_creation_tokens as f64 / 1_000_000.0) * p.cache_write_per_mtok;
        Some(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_add_accumulates_all_fields() {
        let mut total = Usage::default();
        total.add(&Usage { input_tokens: 10, output_tokens: 5, cache_read_tokens: 2, cache_creation_tokens: 1 });
        total.add(&Usage { input_tokens: 3, output_tokens: 1, cache_read_tokens: 0, cache_creation_tokens: 0 });
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 6);
        assert_eq!(total.cache_read_tokens, 2);
        assert_eq!(total.total(), 13 + 6 + 2 + 1);
    }

    #[test]
    fn price_table_computes_cost() {
        let mut table = PriceTable::new();
        table.insert(
            "claude-sonnet-4-20250514",
            ModelPrice {
                input_per_mtok: 3.0,
                output_per_mtok: 15.0,
                cache_read_per_mtok: 0.30,
                cache_write_per_mtok: 3.75,
            },
        );
        let usage = Usage { input_tokens: 1_000_000, output_tokens: 0, cache_read_tokens: 0, cache_creation_tokens: 0 };
        let cost = table.cost_usd("claude-sonnet-4-20250514", &usage).unwrap();
        assert!((cost - 3.0).abs() < 1e-9);
        assert!(table.cost_usd("unknown-model", &usage).is_none());
    }
}
