mod store;

pub use store::{AnalysisCategory, AnalysisEntry, MemoryError, MemoryResult, MemorySnapshot, MemoryStore, QueryFilter};
