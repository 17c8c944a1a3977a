use std::sync::atomic::Ordering;

use serde_derive::{Deserialize, Serialize};
use tracing::info;

use super::core::ring::{free_bytes, Ring};
use super::core::{queue_context, QueueKind, ShmemConfig};
use super::errors::Result;
use super::strategy::Strategy;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub shmem: ShmemConfig,
    /// The consumer usually owns the segment: it creates it on start and
    /// destroys it on close.
    pub ownership: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            shmem: ShmemConfig::default(),
            ownership: true,
        }
    }
}

/// Consumer end of a queue. There is exactly one per queue.
pub struct MessageReader {
    ring: Ring,
    strategy: Box<dyn Strategy>,
    max_message_size: usize,
}

impl MessageReader {
    pub fn new(cfg: &ReaderConfig) -> Result<MessageReader> {
        let (ring, strategy) = queue_context(&cfg.shmem, cfg.ownership)?;
        Ok(MessageReader {
            ring,
            strategy,
            max_message_size: cfg.shmem.max_message_size,
        })
    }

    /// Copies the next message into `buf` and returns its length, or `None`
    /// when nothing is committed yet. Never blocks.
    pub fn dequeue(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.strategy.consume(&self.ring, buf)
    }

    /// Like `dequeue`, into a freshly allocated buffer.
    pub fn dequeue_vec(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.max_message_size];
        Ok(self.dequeue(&mut buf)?.map(|len| {
            buf.truncate(len);
            buf
        }))
    }

    pub fn kind(&self) -> QueueKind {
        self.strategy.kind()
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
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
        info!(kind = %self.kind(), "closing reader");
        self.ring.dispose();
    }
}
