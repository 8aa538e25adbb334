mod manager;

pub use manager::{
    bytes_to_hex_string, hex_string_to_bytes, AssemblyPatchResult, BytePatchResult, PatchError, PatchInfo,
    PatchManager, PatchResult, PatchStatistics, SegmentInjectionResult,
};
