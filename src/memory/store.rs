//! The unified keyed analysis store (§4.3), grounded in
//! `original_source/analysis/memory.cpp` for the store/get/snapshot contract
//! and in the teacher's `disk_store.rs` atomic-write-then-rename pattern for
//! snapshot persistence.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisCategory {
    Note,
    Finding,
    Hypothesis,
    Question,
    Analysis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisEntry {
    pub key: String,
    pub content: String,
    pub category: AnalysisCategory,
    pub address: Option<u64>,
    pub related_addresses: Vec<u64>,
    pub timestamp: i64,
    pub version: u64,
}

/// Filters accepted by `get`; any subset may be set.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub key: Option<String>,
    pub address: Option<u64>,
    pub category: Option<AnalysisCategory>,
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub analyses: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub content: String,
    #[serde(rename = "type")]
    pub category: AnalysisCategory,
    pub address: Option<String>,
    pub related_addresses: Vec<String>,
    pub timestamp: i64,
}

fn hex_of(addr: u64) -> String {
    format!("0x{:x}", addr)
}

fn parse_hex(s: &str) -> MemoryResult<u64> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(s, 16).map_err(|_| MemoryError::InvalidAddress(s.to_string()))
}

pub struct MemoryStore {
    entries: RwLock<HashMap<String, AnalysisEntry>>,
    version: RwLock<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            version: RwLock::new(0),
        }
    }

    fn bump_version(&self) -> u64 {
        let mut v = self.version.write().unwrap();
        *v += 1;
        *v
    }

    /// Stores a new entry. If `key` collides with an existing one, appends
    /// `_1`, `_2`, … and stores under the first free suffixed key — the
    /// original entry is never overwritten.
    pub fn store(
        &self,
        key: &str,
        content: impl Into<String>,
        category: AnalysisCategory,
        address: Option<u64>,
        related_addresses: Vec<u64>,
        now_unix: i64,
    ) -> String {
        let mut entries = self.entries.write().unwrap();
        let mut candidate = key.to_string();
        let mut suffix = 0u32;
        while entries.contains_key(&candidate) {
            suffix += 1;
            candidate = format!("{}_{}", key, suffix);
        }
        // Bump the version while still holding the `entries` write lock so
        // the collision check and the insert below are atomic with respect
        // to a concurrent `store` call racing on the same key.
        let version = self.bump_version();
        entries.insert(
            candidate.clone(),
            AnalysisEntry {
                key: candidate.clone(),
                content: content.into(),
                category,
                address,
                related_addresses,
                timestamp: now_unix,
                version,
            },
        );
        candidate
    }

    /// Reads entries matching all set filters, newest first. A specific
    /// `key` short-circuits to at most one result.
    pub fn get(&self, filter: &QueryFilter) -> MemoryResult<Vec<AnalysisEntry>> {
        let entries = self.entries.read().unwrap();

        if let Some(key) = &filter.key {
            return Ok(entries.get(key).cloned().into_iter().collect());
        }

        let regex = match &filter.pattern {
            Some(p) => Some(
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| MemoryError::InvalidPattern(e.to_string()))?,
            ),
            None => None,
        };

        let mut results: Vec<AnalysisEntry> = entries
            .values()
            .filter(|e| filter.address.map(|a| e.address == Some(a)).unwrap_or(true))
            .filter(|e| filter.category.map(|c| e.category == c).unwrap_or(true))
            .filter(|e| regex.as_ref().map(|r| r.is_match(&e.content)).unwrap_or(true))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(results)
    }

    pub fn get_by_key(&self, key: &str) -> Option<AnalysisEntry> {
        self.entries.read().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn version(&self) -> u64 {
        *self.version.read().unwrap()
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        let entries = self.entries.read().unwrap();
        let mut list: Vec<_> = entries.values().cloned().collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        MemorySnapshot {
            analyses: list
                .into_iter()
                .map(|e| SnapshotEntry {
                    key: e.key,
                    content: e.content,
                    category: e.category,
                    address: e.address.map(hex_of),
                    related_addresses: e.related_addresses.into_iter().map(hex_of).collect(),
                    timestamp: e.timestamp,
                })
                .collect(),
        }
    }

    /// Replaces all contents with `snapshot` and bumps the store-wide
    /// version counter.
    pub fn restore(&self, snapshot: MemorySnapshot) -> MemoryResult<()> {
        let mut entries = self.entries.write().unwrap();
        entries.clear();
        let version = self.bump_version();
        for se in snapshot.analyses {
            let address = se.address.as_deref().map(parse_hex).transpose()?;
            let related_addresses = se
                .related_addresses
                .iter()
                .map(|s| parse_hex(s))
                .collect::<MemoryResult<Vec<u64>>>()?;
            entries.insert(
                se.key.clone(),
                AnalysisEntry {
                    key: se.key,
                    content: se.content,
                    category: se.category,
                    address,
                    related_addresses,
                    timestamp: se.timestamp,
                    version,
                },
            );
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
