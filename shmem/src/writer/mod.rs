use std::sync::atomic::Ordering;

use serde_derive::{Deserialize, Serialize};
use tracing::info;

use super::core::ring::{free_bytes, Ring};
use super::core::{queue_context, QueueKind, ShmemConfig};
use super::errors::{QueueError, Result};
use super::strategy::Strategy;

#[derive(Clone, Default, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub shmem: ShmemConfig,
    /// Create and, on close, destroy the segment. Producers normally attach.
    pub ownership: bool,
}

/// Producer end of a queue.
pub struct MessageWriter {
    ring: Ring,
    strategy: Box<dyn Strategy>,
    max_message_size: usize,
}

impl MessageWriter {
    pub fn new(cfg: &WriterConfig) -> Result<MessageWriter> {
        let (ring, strategy) = queue_context(&cfg.shmem, cfg.ownership)?;
        Ok(MessageWriter {
            ring,
            strategy,
            max_message_size: cfg.shmem.max_message_size,
        })
    }

    /// Appends `message`. `Ok(false)` means the queue is full right now;
    /// retry after the consumer catches up.
    pub fn enqueue(&mut self, message: &[u8]) -> Result<bool> {
        if message.is_empty() {
            return Err(QueueError::EmptyMessage);
        }
        if message.len() > self.max_message_size {
            return Err(QueueError::MessageTooLarge {
                len: message.len(),
                max: self.max_message_size,
            });
        }
        self.strategy.enqueue(&self.ring, message)
    }

    pub fn kind(&self) -> QueueKind {
        self.strategy.kind()
    }

    pub fn queue_size(&self) -> usize {
        self.ring.queue_size()
    }

    pub fn used_bytes(&self) -> usize {
        self.ring.used_bytes()
    }

    pub fn free_bytes(&self) -> usize {
        let head = self.ring.load_head(Ordering::Acquire);
        let tail = self.ring.load_tail(Ordering::Acquire);
        free_bytes(head, tail, self.ring.queue_size())
    }

    pub fn head_offset(&self) -> usize {
        self.ring.load_head(Ordering::Acquire)
    }

    pub fn tail_offset(&self) -> usize {
        self.ring.load_tail(Ordering::Acquire)
    }

    pub fn close(mut self) {
        info!(kind = %self.kind(), "closing writer");
        self.ring.dispose();
    }
}
