pub mod core;
mod errors;
pub mod format;
pub mod reader;
pub mod ready;
pub mod store;
pub mod sync;
pub mod writer;


pub use crate::core::{QueueConfig, QueueService, RacePolicy};
pub use errors::{QueueError, Result};
pub use format::SlotFormat;
pub use reader::{Message, MessageReader};
pub use ready::{ReadyOutcome, ReadySignals};
pub use store::QueueHeader;
pub use writer::MessageWriter;

pub const HEADER_SIZE: usize = store::HEADER_SIZE;
pub const DEFAULT_SLOT_SIZE: usize = store::DEFAULT_SLOT_SIZE;
