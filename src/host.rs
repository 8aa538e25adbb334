//! The host disassembler is an external collaborator (§6); this crate only
//! needs its query/mutation surface to compile and test the Tool Registry
//! and Patch Manager. `HostAnalysis` is that surface as an async trait,
//! grounded in `original_source/src/tool_system.h`'s method list. `FakeHost`
//! is an in-memory double used by tests, mirroring the teacher's pairing of
//! a real disk-backed store with an in-memory test double implementing the
//! same trait (`DiskThreadStore` / `InMemoryThreadStore`).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("address out of range: {0:#x}")]
    AddressOutOfRange(u64),
    #[error("no function at address {0:#x}")]
    NoFunctionAt(u64),
    #[error("host query failed: {0}")]
    QueryFailed(String),
    #[error("host mutation failed: {0}")]
    MutationFailed(String),
}

pub type HostResult<T> = std::result::Result<T, HostError>;

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub address: u64,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct XrefInfo {
    pub from: u64,
    pub to: u64,
    pub kind: String,
}

/// The binary-analysis primitives the tool catalog dispatches into. Out of
/// scope per the distilled spec; modeled here only so the Tool Registry and
/// Patch Manager have something concrete to call and test against.
#[async_trait]
pub trait HostAnalysis: Send + Sync {
    // Queries
    async fn list_functions(&self) -> HostResult<Vec<FunctionInfo>>;
    async fn search_functions(&self, pattern: &str) -> HostResult<Vec<FunctionInfo>>;
    async fn function_at(&self, address: u64) -> HostResult<FunctionInfo>;
    async fn xrefs_to(&self, address: u64) -> HostResult<Vec<XrefInfo>>;
    async fn xrefs_from(&self, address: u64) -> HostResult<Vec<XrefInfo>>;
    async fn disassemble(&self, address: u64, len: usize) -> HostResult<String>;
    async fn decompile(&self, address: u64) -> HostResult<String>;
    async fn read_bytes(&self, address: u64, len: usize) -> HostResult<Vec<u8>>;
    /// Assembles `asm` for the host's architecture without writing
    /// anything. Used by the Patch Manager to turn `new_asm` into machine
    /// code before verifying and applying an assembly patch.
    async fn assemble(&self, address: u64, asm: &str) -> HostResult<Vec<u8>>;

    // Mutations
    async fn set_name(&self, address: u64, name: &str) -> HostResult<()>;
    async fn set_comment(&self, address: u64, comment: &str) -> HostResult<()>;
    async fn set_function_prototype(&self, address: u64, prototype: &str) -> HostResult<()>;
    async fn set_variable_type(&self, address: u64, variable: &str, ty: &str) -> HostResult<()>;
    async fn write_bytes(&self, address: u64, bytes: &[u8]) -> HostResult<()>;
    async fn reanalyze(&self, address: u64, len: usize) -> HostResult<()>;
    async fn create_segment(&self, address: u64, size: usize, name: &str) -> HostResult<()>;
}

/// An in-memory host double: a flat byte image plus name/comment overlays.
/// Deterministic and side-effect free, used by Patch Manager and Tool
/// Registry unit tests.
pub struct FakeHost {
    image: RwLock<HashMap<u64, u8>>,
    names: RwLock<HashMap<u64, String>>,
    comments: RwLock<HashMap<u64, String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            image: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            comments: RwLock::new(HashMap::new()),
        }
    }

    /// Seeds a contiguous byte range, for test setup.
    pub fn seed_bytes(&self, address: u64, bytes: &[u8]) {
        let mut image = self.image.write().unwrap();
        for (i, b) in bytes.iter().enumerate() {
            image.insert(address + i as u64, *b);
        }
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostAnalysis for FakeHost {
    async fn list_functions(&self) -> HostResult<Vec<FunctionInfo>> {
        Ok(Vec::new())
    }

    async fn search_functions(&self, _pattern: &str) -> HostResult<Vec<FunctionInfo>> {
        Ok(Vec::new())
    }

    async fn function_at(&self, address: u64) -> HostResult<FunctionInfo> {
        let names = self.names.read().unwrap();
        names
            .get(&address)
            .map(|name| FunctionInfo { address, name: name.clone(), size: 0 })
            .ok_or(HostError::NoFunctionAt(address))
    }

    async fn xrefs_to(&self, _address: u64) -> HostResult<Vec<XrefInfo>> {
        Ok(Vec::new())
    }

    async fn xrefs_from(&self, _address: u64) -> HostResult<Vec<XrefInfo>> {
        Ok(Vec::new())
    }

    async fn disassemble(&self, address: u64, len: usize) -> HostResult<String> {
        let bytes = self.read_bytes(address, len).await?;
        Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" "))
    }

    async fn decompile(&self, _address: u64) -> HostResult<String> {
        Ok(String::new())
    }

    /// Treats `asm` as whitespace-separated hex byte literals (e.g. `"90
    /// 90 c3"`), which is all a deterministic in-memory double needs to
    /// exercise the Patch Manager's assemble-then-verify path.
    async fn assemble(&self, _address: u64, asm: &str) -> HostResult<Vec<u8>> {
        asm.split_whitespace()
            .map(|tok| u8::from_str_radix(tok, 16).map_err(|_| HostError::MutationFailed(format!("cannot assemble token: {tok}"))))
            .collect()
    }

    async fn read_bytes(&self, address: u64, len: usize) -> HostResult<Vec<u8>> {
        let image = self.image.read().unwrap();
        let mut out = Vec::with_capacity(len);
        for i in 0..len as u64 {
            out.push(*image.get(&(address + i)).ok_or(HostError::AddressOutOfRange(address + i))?);
        }
        Ok(out)
    }

    async fn set_name(&self, address: u64, name: &str) -> HostResult<()> {
        self.names.write().unwrap().insert(address, name.to_string());
        Ok(())
    }

    async fn set_comment(&self, address: u64, comment: &str) -> HostResult<()> {
        self.comments.write().unwrap().insert(address, comment.to_string());
        Ok(())
    }

    async fn set_function_prototype(&self, _address: u64, _prototype: &str) -> HostResult<()> {
        Ok(())
    }

    async fn set_variable_type(&self, _address: u64, _variable: &str, _ty: &str) -> HostResult<()> {
        Ok(())
    }

    async fn write_bytes(&self, address: u64, bytes: &[u8]) -> HostResult<()> {
        let mut image = self.image.write().unwrap();
        for (i, b) in bytes.iter().enumerate() {
            image.insert(address + i as u64, *b);
        }
        Ok(())
    }

    async fn reanalyze(&self, _address: u64, _len: usize) -> HostResult<()> {
        Ok(())
    }

    async fn create_segment(&self, address: u64, size: usize, _name: &str) -> HostResult<()> {
        let mut image = self.image.write().unwrap();
        for i in 0..size as u64 {
            image.entry(address + i).or_insert(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_host_round_trips_name_and_bytes() {
        let host = FakeHost::new();
        host.seed_bytes(0x1000, &[0x90, 0x90, 0x90]);
        host.set_name(0x1000, "sub_1000").await.unwrap();
        assert_eq!(host.function_at(0x1000).await.unwrap().name, "sub_1000");
        assert_eq!(host.read_bytes(0x1000, 3).await.unwrap(), vec![0x90, 0x90, 0x90]);
    }

    #[tokio::test]
    async fn read_out_of_range_is_an_error() {
        let host = FakeHost::new();
        assert!(host.read_bytes(0x2000, 1).await.is_err());
    }
}
