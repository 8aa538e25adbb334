mod coordinator;
mod detector;

pub use coordinator::{
    ConflictCoordinator, ConflictDescriptor, ConflictOutcome, ConflictPhase, ConflictTrigger,
};
pub use detector::{ConflictDetector, ToolCallRecord};
