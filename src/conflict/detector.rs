//! Durable record of write-tool calls keyed by (binary, address, tool) and
//! the write-conflict check (§4.4). Persisted the way the teacher's
//! `disk_store.rs` persists threads: one JSON file per binary identity,
//! written atomically (temp file + rename), cached in memory behind an
//! `RwLock`, so agents opening the same binary see each other's writes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

use crate::tools::catalog::tool_class;
use crate::types::AgentId;

#[derive(Debug, Error)]
pub enum ConflictDetectorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConflictDetectorError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub address: u64,
    pub params: serde_json::Value,
    pub agent_id: AgentId,
    pub timestamp: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BinaryLedger {
    // keyed by "{address:x}:{tool_name}"
    records: HashMap<String, Vec<ToolCallRecord>>,
}

fn record_key(address: u64, tool_name: &str) -> String {
    format!("{:x}:{}", address, tool_name)
}

pub struct ConflictDetector {
    base_path: Option<PathBuf>,
    ledgers: RwLock<HashMap<String, BinaryLedger>>,
}

impl ConflictDetector {
    /// An in-memory-only detector, for tests and ephemeral runs.
    pub fn in_memory() -> Self {
        Self { base_path: None, ledgers: RwLock::new(HashMap::new()) }
    }

    /// A detector backed by `base_path`, one JSON file per binary identity.
    pub fn with_path(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: Some(base_path.into()), ledgers: RwLock::new(HashMap::new()) }
    }

    fn ledger_path(&self, binary_id: &str) -> Option<PathBuf> {
        self.base_path.as_ref().map(|base| {
            let safe: String = binary_id
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect();
            base.join(format!("{safe}.json"))
        })
    }

    fn load_ledger(&self, binary_id: &str) -> Result<BinaryLedger> {
        if let Some(path) = self.ledger_path(binary_id) {
            if path.exists() {
                let content = fs::read_to_string(&path)?;
                return Ok(serde_json::from_str(&content)?);
            }
        }
        Ok(BinaryLedger::default())
    }

    fn save_ledger(&self, binary_id: &str, ledger: &BinaryLedger) -> Result<()> {
        if let Some(path) = self.ledger_path(binary_id) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(ledger)?;
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, content)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    /// Appends a tool-call record. Never fails on duplicate; it is
    /// append-only by design.
    pub fn record(&self, binary_id: &str, record: ToolCallRecord) -> Result<()> {
        let mut ledgers = self.ledgers.write().unwrap();
        if !ledgers.contains_key(binary_id) {
            let loaded = self.load_ledger(binary_id)?;
            ledgers.insert(binary_id.to_string(), loaded);
        }
        let ledger = ledgers.get_mut(binary_id).unwrap();
        let key = record_key(record.address, &record.tool_name);
        ledger.records.entry(key).or_default().push(record);
        self.save_ledger(binary_id, ledger)?;
        Ok(())
    }

    /// Returns prior write-records at `address` by agents other than
    /// `caller_agent_id` whose tool semantically collides with `tool_name`
    /// (same collision class, per `tool_class`).
    pub fn check_conflict(
        &self,
        binary_id: &str,
        tool_name: &str,
        address: u64,
        caller_agent_id: &AgentId,
    ) -> Result<Vec<ToolCallRecord>> {
        let Some(class) = tool_class(tool_name) else {
            return Ok(Vec::new());
        };

        let mut ledgers = self.ledgers.write().unwrap();
        if !ledgers.contains_key(binary_id) {
            let loaded = self.load_ledger(binary_id)?;
            ledgers.insert(binary_id.to_string(), loaded);
        }
        let ledger = ledgers.get(binary_id).unwrap();

        let mut hits = Vec::new();
        for (key, records) in &ledger.records {
            // key format "{address:x}:{tool}"
            let Some((addr_part, other_tool)) = key.split_once(':') else { continue };
            let Ok(key_addr) = u64::from_str_radix(addr_part, 16) else { continue };
            if key_addr != address {
                continue;
            }
            if tool_class(other_tool) != Some(class) {
                continue;
            }
            for r in records {
                if r.agent_id != *caller_agent_id {
                    hits.push(r.clone());
                }
            }
        }
        hits.sort_by_key(|r| r.timestamp);
        Ok(hits)
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(tool: &str, addr: u64, agent: &str, ts: i64) -> ToolCallRecord {
        ToolCallRecord {
            tool_name: tool.into(),
            address: addr,
            params: serde_json::json!({}),
            agent_id: AgentId::new(agent),
            timestamp: ts,
        }
    }

    #[test]
    fn other_agent_write_is_reported_as_prior_writer() {
        let detector = ConflictDetector::in_memory();
        detector.record("bin1", rec("set_name", 0x500, "A", 1)).unwrap();
        let hits = detector
            .check_conflict("bin1", "set_name", 0x500, &AgentId::new("B"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].agent_id.as_str(), "A");
    }

    #[test]
    fn same_agent_write_is_not_a_conflict_with_itself() {
        let detector = ConflictDetector::in_memory();
        detector.record("bin1", rec("set_name", 0x500, "A", 1)).unwrap();
        let hits = detector.check_conflict("bin1", "set_name", 0x500, &AgentId::new("A")).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn different_tool_classes_do_not_collide() {
        let detector = ConflictDetector::in_memory();
        detector.record("bin1", rec("set_name", 0x500, "A", 1)).unwrap();
        let hits = detector
            .check_conflict("bin1", "set_variable_type", 0x500, &AgentId::new("B"))
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn read_tools_never_conflict() {
        let detector = ConflictDetector::in_memory();
        let hits = detector.check_conflict("bin1", "decompile", 0x500, &AgentId::new("B")).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn persists_across_detector_instances_with_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ConflictDetector::with_path(dir.path());
        detector.record("bin1", rec("set_name", 0x10, "A", 1)).unwrap();

        let detector2 = ConflictDetector::with_path(dir.path());
        let hits = detector2.check_conflict("bin1", "set_name", 0x10, &AgentId::new("B")).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
