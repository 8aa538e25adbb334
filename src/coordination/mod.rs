mod client;
mod frame;

pub use client::{CoordinationClient, CoordinationEvent, CoordinationClientError};
pub use frame::{parse_frame, CoordinationFrame, LldbFrame};
