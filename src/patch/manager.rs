//! Byte/assembly patching and segment injection against a live binary
//! (§4.2), grounded in `original_source/patching/patch_manager.h`. The
//! original keeps a Keystone assembler and a LIEF-based segment injector
//! inline; both belong to the host disassembler boundary here (`HostAnalysis`
//! exposes `assemble`/`write_bytes`/`create_segment`/`reanalyze`), so this
//! manager owns patch bookkeeping plus the verify-before-write guard: a
//! byte or assembly patch only lands if the current state at `address`
//! still matches what the caller believes is there.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::host::{HostAnalysis, HostError};

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("host error: {0}")]
    Host(#[from] HostError),
    #[error("no patch recorded at address {0:#x}")]
    NoPatchAt(u64),
    #[error("empty patch payload")]
    EmptyPayload,
    #[error("description must not be empty")]
    MissingDescription,
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error("original bytes mismatch at {address:#x}: expected {expected}, found {found}")]
    OriginalBytesMismatch { address: u64, expected: String, found: String },
    #[error("original disassembly mismatch at {address:#x}: expected {expected:?}, found {found:?}")]
    OriginalAsmMismatch { address: u64, expected: String, found: String },
    #[error("assembled patch at {address:#x} is {assembled} bytes, longer than the {region} byte region it replaces; use segment injection instead")]
    PatchTooLong { address: u64, assembled: usize, region: usize },
}

pub type PatchResult<T> = std::result::Result<T, PatchError>;

#[derive(Debug, Clone)]
pub struct BytePatchResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub bytes_patched: usize,
}

#[derive(Debug, Clone)]
pub struct AssemblyPatchResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub bytes_patched: usize,
    pub nops_added: usize,
}

#[derive(Debug, Clone)]
pub struct SegmentInjectionResult {
    pub success: bool,
    pub segment_address: u64,
    pub segment_name: String,
    pub allocated_size: usize,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PatchInfo {
    pub address: u64,
    pub original_bytes_hex: String,
    pub patched_bytes_hex: String,
    pub description: String,
    pub timestamp: i64,
    pub is_assembly_patch: bool,
    pub original_asm: Option<String>,
    pub patched_asm: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PatchStatistics {
    pub total_patches: usize,
    pub assembly_patches: usize,
    pub byte_patches: usize,
    pub total_bytes_patched: usize,
}

pub fn bytes_to_hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parses a hex byte string, tolerating the `"90 90 90"` space-separated
/// form alongside the bare `"909090"` form.
pub fn hex_string_to_bytes(hex: &str) -> PatchResult<Vec<u8>> {
    let compact: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(PatchError::EmptyPayload);
    }
    if compact.len() % 2 != 0 {
        return Err(PatchError::InvalidHex(hex.to_string()));
    }
    let mut out = Vec::with_capacity(compact.len() / 2);
    let chars: Vec<char> = compact.chars().collect();
    for pair in chars.chunks(2) {
        let s: String = pair.iter().collect();
        let byte = u8::from_str_radix(&s, 16).map_err(|_| PatchError::InvalidHex(hex.to_string()))?;
        out.push(byte);
    }
    Ok(out)
}

/// Collapses whitespace and lowercases mnemonics so `"MOV  EAX, 1"` and
/// `"mov eax, 1"` compare equal (§4.2's normalization rule).
fn normalize_asm(asm: &str) -> String {
    asm.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[derive(Debug, Clone)]
struct PatchEntry {
    address: u64,
    original_bytes: Vec<u8>,
    patched_bytes: Vec<u8>,
    description: String,
    timestamp: i64,
    is_assembly_patch: bool,
    original_asm: Option<String>,
    patched_asm: Option<String>,
    is_segment_injection: bool,
}

const X86_NOP: u8 = 0x90;

pub struct PatchManager {
    host: Arc<dyn HostAnalysis>,
    patches: RwLock<HashMap<u64, PatchEntry>>,
}

impl PatchManager {
    pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
        Self { host, patches: RwLock::new(HashMap::new()) }
    }

    /// Writes `new_hex` at `address`, but only after confirming the bytes
    /// currently there equal `original_hex` — a caller racing against a
    /// stale read gets a typed mismatch instead of silently clobbering
    /// whatever is actually at that address (§4.2).
    pub async fn apply_byte_patch(
        &self,
        address: u64,
        original_hex: &str,
        new_hex: &str,
        description: impl Into<String>,
        now_unix: i64,
    ) -> PatchResult<BytePatchResult> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(PatchError::MissingDescription);
        }

        let expected_original = hex_string_to_bytes(original_hex)?;
        let new_bytes = hex_string_to_bytes(new_hex)?;
        if new_bytes.is_empty() {
            return Err(PatchError::EmptyPayload);
        }

        let current = self.host.read_bytes(address, expected_original.len()).await?;
        if current != expected_original {
            return Err(PatchError::OriginalBytesMismatch {
                address,
                expected: bytes_to_hex_string(&expected_original),
                found: bytes_to_hex_string(&current),
            });
        }

        self.host.write_bytes(address, &new_bytes).await?;
        self.host.reanalyze(address, new_bytes.len()).await?;

        self.patches.write().unwrap().insert(
            address,
            PatchEntry {
                address,
                original_bytes: current,
                patched_bytes: new_bytes.clone(),
                description,
                timestamp: now_unix,
                is_assembly_patch: false,
                original_asm: None,
                patched_asm: None,
                is_segment_injection: false,
            },
        );

        Ok(BytePatchResult { success: true, error_message: None, bytes_patched: new_bytes.len() })
    }

    /// Assembles `new_asm` for the host's architecture, verifies the
    /// current disassembly at `address` (over the replaced region) matches
    /// `original_asm` after normalization, then writes the machine code,
    /// padding with `NOP` up to `pad_to_len` when the assembled instruction
    /// is shorter than the region it replaces (§4.2).
    pub async fn apply_assembly_patch(
        &self,
        address: u64,
        original_asm: &str,
        new_asm: &str,
        pad_to_len: Option<usize>,
        description: impl Into<String>,
        now_unix: i64,
    ) -> PatchResult<AssemblyPatchResult> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(PatchError::MissingDescription);
        }

        let machine_code = self.host.assemble(address, new_asm).await?;
        if machine_code.is_empty() {
            return Err(PatchError::EmptyPayload);
        }

        let total_len = pad_to_len.unwrap_or(machine_code.len());
        if machine_code.len() > total_len {
            return Err(PatchError::PatchTooLong { address, assembled: machine_code.len(), region: total_len });
        }

        let current_asm = self.host.disassemble(address, total_len).await?;
        if normalize_asm(&current_asm) != normalize_asm(original_asm) {
            return Err(PatchError::OriginalAsmMismatch {
                address,
                expected: original_asm.to_string(),
                found: current_asm,
            });
        }

        let mut padded = machine_code.clone();
        let nops_added = total_len - machine_code.len();
        padded.extend(std::iter::repeat(X86_NOP).take(nops_added));

        let original = self.host.read_bytes(address, padded.len()).await?;
        self.host.write_bytes(address, &padded).await?;
        self.host.reanalyze(address, padded.len()).await?;

        self.patches.write().unwrap().insert(
            address,
            PatchEntry {
                address,
                original_bytes: original,
                patched_bytes: padded.clone(),
                description,
                timestamp: now_unix,
                is_assembly_patch: true,
                original_asm: Some(original_asm.to_string()),
                patched_asm: Some(new_asm.to_string()),
                is_segment_injection: false,
            },
        );

        Ok(AssemblyPatchResult {
            success: true,
            error_message: None,
            bytes_patched: padded.len(),
            nops_added,
        })
    }

    pub async fn apply_segment_injection(
        &self,
        address: u64,
        size: usize,
        name: impl Into<String>,
        description: impl Into<String>,
        now_unix: i64,
    ) -> PatchResult<SegmentInjectionResult> {
        let name = name.into();
        self.host.create_segment(address, size, &name).await?;

        self.patches.write().unwrap().insert(
            address,
            PatchEntry {
                address,
                original_bytes: Vec::new(),
                patched_bytes: vec![0u8; size],
                description: description.into(),
                timestamp: now_unix,
                is_assembly_patch: false,
                original_asm: None,
                patched_asm: None,
                is_segment_injection: true,
            },
        );

        Ok(SegmentInjectionResult {
            success: true,
            segment_address: address,
            segment_name: name,
            allocated_size: size,
            error_message: None,
        })
    }

    /// Restores the original bytes at `address` and forgets the patch.
    /// Segment injections cannot be reverted (there is nothing to restore
    /// the memory to) and return `NoPatchAt`.
    pub async fn revert_patch(&self, address: u64) -> PatchResult<()> {
        let entry = {
            let patches = self.patches.read().unwrap();
            patches.get(&address).cloned().ok_or(PatchError::NoPatchAt(address))?
        };
        if entry.is_segment_injection || entry.original_bytes.is_empty() {
            return Err(PatchError::NoPatchAt(address));
        }
        self.host.write_bytes(address, &entry.original_bytes).await?;
        self.host.reanalyze(address, entry.original_bytes.len()).await?;
        self.patches.write().unwrap().remove(&address);
        Ok(())
    }

    /// Reverts every live patch in reverse chronological order (§4.2), most
    /// recently applied first.
    pub async fn revert_all(&self) -> Vec<(u64, PatchResult<()>)> {
        let mut entries: Vec<(u64, i64)> = self
            .patches
            .read()
            .unwrap()
            .values()
            .map(|e| (e.address, e.timestamp))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));

        let mut results = Vec::with_capacity(entries.len());
        for (address, _) in entries {
            results.push((address, self.revert_patch(address).await));
        }
        results
    }

    pub fn list_patches(&self) -> Vec<PatchInfo> {
        let patches = self.patches.read().unwrap();
        let mut infos: Vec<PatchInfo> = patches.values().map(entry_to_info).collect();
        infos.sort_by_key(|p| p.address);
        infos
    }

    pub fn get_patch_info(&self, address: u64) -> Option<PatchInfo> {
        self.patches.read().unwrap().get(&address).map(entry_to_info)
    }

    pub fn statistics(&self) -> PatchStatistics {
        let patches = self.patches.read().unwrap();
        let mut stats = PatchStatistics::default();
        for entry in patches.values() {
            stats.total_patches += 1;
            if entry.is_assembly_patch {
                stats.assembly_patches += 1;
            } else if !entry.is_segment_injection {
                stats.byte_patches += 1;
            }
            stats.total_bytes_patched += entry.patched_bytes.len();
        }
        stats
    }
}

fn entry_to_info(entry: &PatchEntry) -> PatchInfo {
    PatchInfo {
        address: entry.address,
        original_bytes_hex: bytes_to_hex_string(&entry.original_bytes),
        patched_bytes_hex: bytes_to_hex_string(&entry.patched_bytes),
        description: entry.description.clone(),
        timestamp: entry.timestamp,
        is_assembly_patch: entry.is_assembly_patch,
        original_asm: entry.original_asm.clone(),
        patched_asm: entry.patched_asm.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FakeHost;

    fn manager_with_seeded_host() -> PatchManager {
        let host = FakeHost::new();
        host.seed_bytes(0x1000, &[0x55, 0x48, 0x89, 0xe5, 0xc3]);
        PatchManager::new(Arc::new(host))
    }

    #[test]
    fn hex_round_trips() {
        let bytes = vec![0x90, 0xde, 0xad, 0xbe, 0xef];
        let hex = bytes_to_hex_string(&bytes);
        assert_eq!(hex, "90deadbeef");
        assert_eq!(hex_string_to_bytes(&hex).unwrap(), bytes);
    }

    #[tokio::test]
    async fn byte_patch_records_original_and_can_be_reverted() {
        let manager = manager_with_seeded_host();
        let result = manager.apply_byte_patch(0x1000, "55 48", "90 90", "nop out prologue check", 1).await.unwrap();
        assert!(result.success);
        assert_eq!(result.bytes_patched, 2);

        let info = manager.get_patch_info(0x1000).unwrap();
        assert_eq!(info.original_bytes_hex, "5548");
        assert_eq!(info.patched_bytes_hex, "9090");

        manager.revert_patch(0x1000).await.unwrap();
        assert!(manager.get_patch_info(0x1000).is_none());
    }

    /// Scenario S2: a second patch attempt against a stale `original_hex`
    /// must fail with a mismatch reason and leave state unchanged.
    #[tokio::test]
    async fn byte_patch_fails_on_stale_original_and_leaves_state_unchanged() {
        let manager = manager_with_seeded_host();
        manager.apply_byte_patch(0x1000, "55 48", "cc cc", "trap prologue", 1).await.unwrap();

        let second = manager.apply_byte_patch(0x1000, "55 48", "90 90", "undo trap", 2).await;
        assert!(matches!(second, Err(PatchError::OriginalBytesMismatch { .. })));

        // unchanged: still shows the first patch's bytes, not a third state
        let info = manager.get_patch_info(0x1000).unwrap();
        assert_eq!(info.patched_bytes_hex, "cccc");
    }

    #[tokio::test]
    async fn byte_patch_rejects_empty_description() {
        let manager = manager_with_seeded_host();
        let result = manager.apply_byte_patch(0x1000, "55 48", "90 90", "  ", 1).await;
        assert!(matches!(result, Err(PatchError::MissingDescription)));
    }

    #[tokio::test]
    async fn assembly_patch_pads_with_nops_when_shorter_than_region() {
        let manager = manager_with_seeded_host();
        // FakeHost::disassemble hex-dumps raw bytes, so the "expected
        // disassembly" of the seeded region is just its hex byte sequence.
        let result = manager
            .apply_assembly_patch(0x1000, "55 48 89", "c3", Some(3), "short-circuit function", 2)
            .await
            .unwrap();
        assert_eq!(result.bytes_patched, 3);
        assert_eq!(result.nops_added, 2);

        let info = manager.get_patch_info(0x1000).unwrap();
        assert_eq!(info.patched_bytes_hex, "c39090");
        assert!(info.is_assembly_patch);
    }

    /// Scenario-adjacent to S2 but for the assembly path: a stale
    /// `original_asm` must be rejected before anything is written.
    #[tokio::test]
    async fn assembly_patch_fails_on_disassembly_mismatch() {
        let manager = manager_with_seeded_host();
        let result = manager.apply_assembly_patch(0x1000, "ff ff ff", "c3", Some(3), "wrong original", 1).await;
        assert!(matches!(result, Err(PatchError::OriginalAsmMismatch { .. })));
        assert!(manager.get_patch_info(0x1000).is_none());
    }

    #[tokio::test]
    async fn segment_injection_cannot_be_reverted() {
        let manager = manager_with_seeded_host();
        let result = manager.apply_segment_injection(0x500000, 64, "swarm_scratch", "scratch space", 1).await.unwrap();
        assert!(result.success);
        assert_eq!(result.allocated_size, 64);
        assert!(manager.revert_patch(0x500000).await.is_err());
    }

    #[tokio::test]
    async fn statistics_tally_across_patch_kinds() {
        let manager = manager_with_seeded_host();
        manager.apply_byte_patch(0x1000, "55", "90", "a", 1).await.unwrap();
        manager.apply_assembly_patch(0x1003, "e5", "c3", None, "b", 2).await.unwrap();
        let stats = manager.statistics();
        assert_eq!(stats.total_patches, 2);
        assert_eq!(stats.byte_patches, 1);
        assert_eq!(stats.assembly_patches, 1);
    }

    #[tokio::test]
    async fn revert_all_reverts_every_outstanding_patch() {
        let manager = manager_with_seeded_host();
        manager.apply_byte_patch(0x1000, "55", "90", "a", 1).await.unwrap();
        manager.apply_byte_patch(0x1001, "48", "90", "b", 2).await.unwrap();
        let results = manager.revert_all().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(manager.list_patches().is_empty());
    }

    /// §4.2: `revert_all` reverts in reverse chronological order, not
    /// hash-map iteration order.
    #[tokio::test]
    async fn revert_all_reverts_in_reverse_chronological_order() {
        let manager = manager_with_seeded_host();
        manager.apply_byte_patch(0x1000, "55", "90", "a", 1).await.unwrap();
        manager.apply_byte_patch(0x1001, "48", "cc", "b", 2).await.unwrap();
        let results = manager.revert_all().await;
        let order: Vec<u64> = results.iter().map(|(addr, _)| *addr).collect();
        assert_eq!(order, vec![0x1001, 0x1000]);
    }

    #[tokio::test]
    async fn assembly_patch_fails_when_assembled_code_is_longer_than_the_region() {
        let manager = manager_with_seeded_host();
        let result = manager.apply_assembly_patch(0x1000, "55 48 89", "c3 c3", Some(1), "too long", 1).await;
        assert!(matches!(result, Err(PatchError::PatchTooLong { assembled, region, .. }) if assembled > region));
        assert!(manager.get_patch_info(0x1000).is_none());
    }
}
