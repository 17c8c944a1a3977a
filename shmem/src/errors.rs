use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Everything that can go wrong while opening or driving a queue.
///
/// A full queue and an empty queue are not errors: `enqueue` reports the
/// former as `Ok(false)` and `dequeue` the latter as `Ok(None)`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("shared memory error: {0}")]
    SharedMemory(#[from] shared_memory::ShmemError),

    #[error("segment {} is {actual} bytes, expected {expected}", path.display())]
    SegmentSize {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    // raw_sync hands back a non-Send `Box<dyn Error>`, so only the text is kept.
    #[error("producer lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid queue configuration: {0}")]
    Config(String),

    #[error("message of {len} bytes exceeds the max message size of {max} bytes")]
    MessageTooLarge { len: usize, max: usize },

    #[error("empty messages cannot be enqueued")]
    EmptyMessage,

    #[error("buffer of {capacity} bytes is too small for a {len} byte message")]
    BufferTooSmall { len: usize, capacity: usize },

    #[error("protocol violation at offset {offset}: {detail}")]
    ProtocolViolation { offset: usize, detail: String },
}

impl QueueError {
    pub(crate) fn violation(offset: usize, detail: impl Into<String>) -> QueueError {
        QueueError::ProtocolViolation {
            offset,
            detail: detail.into(),
        }
    }

    /// The shared layout is corrupt or a cursor invariant broke.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, QueueError::ProtocolViolation { .. })
    }

    /// The caller passed something the queue can never accept.
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            QueueError::MessageTooLarge { .. }
                | QueueError::EmptyMessage
                | QueueError::BufferTooSmall { .. }
                | QueueError::Config(_)
        )
    }

    /// The shared segment or its lock could not be created or attached.
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            QueueError::SharedMemory(_)
                | QueueError::SegmentSize { .. }
                | QueueError::Lock(_)
                | QueueError::Io(_)
        )
    }
}
