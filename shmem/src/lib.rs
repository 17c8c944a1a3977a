//! Byte-message queues over a shared memory segment, for one consumer process
//! and one or many producer processes.

pub mod core;
mod errors;
pub mod probe;
pub mod reader;
mod strategy;
pub mod writer;

#[cfg(test)]
mod tests;

pub use crate::core::{QueueKind, SharedSegment, ShmemConfig};
pub use crate::errors::{QueueError, Result};
pub use crate::reader::{MessageReader, ReaderConfig};
pub use crate::writer::{MessageWriter, WriterConfig};
