//! The three queue protocols, expressed over one capability set.
//!
//! A producer calls `enqueue`, which by default is `reserve`, a payload copy
//! and `commit`. The consumer calls `consume`. Which implementation runs is
//! decided once, from `ShmemConfig::kind`, when a handle is opened.

use crate::core::ring::Ring;
use crate::core::{QueueKind, ShmemConfig};
use crate::errors::Result;

mod locked;
mod mpsc;
mod spsc;

pub(crate) use self::locked::{MpscLocked, ProducerLock};
pub(crate) use self::mpsc::MpscCas;
pub(crate) use self::spsc::Spsc;

/// Space handed to one producer for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reservation {
    /// Offset of the control word.
    pub offset: usize,
    /// Tail to publish on commit. `None` when the reservation itself already
    /// moved the tail.
    pub next_tail: Option<usize>,
}

pub(crate) trait Strategy: Send {
    fn kind(&self) -> QueueKind;

    /// Owner-only initialization of the data region, run right after the
    /// header is zeroed.
    fn seed(&self, _ring: &Ring) -> Result<()> {
        Ok(())
    }

    /// Claims room for a `len` byte message, or `None` when the queue is full.
    fn reserve(&self, ring: &Ring, len: usize) -> Result<Option<Reservation>>;

    /// Publishes a reservation whose payload has been written.
    fn commit(&self, ring: &Ring, reservation: Reservation, len: usize) -> Result<()>;

    /// Copies the next committed message into `buf` and releases its space.
    fn consume(&self, ring: &Ring, buf: &mut [u8]) -> Result<Option<usize>>;

    fn enqueue(&self, ring: &Ring, message: &[u8]) -> Result<bool> {
        match self.reserve(ring, message.len())? {
            Some(reservation) => {
                ring.write_payload(reservation.offset, message)?;
                self.commit(ring, reservation, message.len())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub(crate) fn build(cfg: &ShmemConfig, ownership: bool) -> Result<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match cfg.kind {
        QueueKind::Spsc => Box::new(Spsc::new(cfg.max_message_size)),
        QueueKind::Mpsc => Box::new(MpscCas::new(cfg.max_message_size, cfg.max_producer_count)),
        QueueKind::MpscLocked => Box::new(MpscLocked::new(
            Spsc::new(cfg.max_message_size),
            ProducerLock::open(cfg, ownership)?,
        )),
    };
    Ok(strategy)
}
