use std::hint;
use std::sync::atomic::Ordering;

use tracing::{debug, error};

use super::{Reservation, Strategy};
use crate::core::ring::{free_bytes, slot_size, would_wrap, Control, Ring, UNCOMMITTED, WRAP};
use crate::core::QueueKind;
use crate::errors::{QueueError, Result};

/// Fixed-size slots reserved by many producers through a CAS on `tail`.
///
/// Every slot is `slot_size` bytes whatever the payload length, so the
/// consumer always knows the stride even while a slot is still uncommitted.
/// A slot's control word cycles `UNCOMMITTED -> len -> UNCOMMITTED`.
pub(crate) struct MpscCas {
    max_message_size: usize,
    slot_size: usize,
    margin: usize,
}

impl MpscCas {
    pub(crate) fn new(max_message_size: usize, max_producer_count: usize) -> MpscCas {
        let slot_size = slot_size(max_message_size);
        MpscCas {
            max_message_size,
            slot_size,
            // Room for every other producer's in-flight reservation plus ours.
            margin: slot_size * (max_producer_count + 1),
        }
    }

    /// Offset the slot after `offset` lives at, or 0 when `offset` is the
    /// last slot that fits.
    #[inline]
    fn next_slot(&self, offset: usize, queue_size: usize) -> usize {
        let next = offset + self.slot_size;
        if next >= queue_size {
            0
        } else {
            next
        }
    }

    fn violation(&self, offset: usize, raw: i32, what: &str) -> QueueError {
        error!(offset, raw, "{}", what);
        QueueError::violation(offset, format!("{} (control word {})", what, raw))
    }
}

impl Strategy for MpscCas {
    fn kind(&self) -> QueueKind {
        QueueKind::Mpsc
    }

    fn seed(&self, ring: &Ring) -> Result<()> {
        let queue_size = ring.queue_size();
        let mut offset = 0;
        while !would_wrap(offset, self.slot_size, queue_size) {
            ring.store_control(offset, UNCOMMITTED)?;
            offset += self.slot_size;
        }
        // Remainder too short for a slot is never reserved, only skipped.
        if offset < queue_size {
            ring.store_control(offset, WRAP)?;
        }
        Ok(())
    }

    fn reserve(&self, ring: &Ring, _len: usize) -> Result<Option<Reservation>> {
        let queue_size = ring.queue_size();
        let offset = loop {
            let tail = ring.check_cursor("tail", ring.load_tail(Ordering::Acquire))?;
            let head = ring.check_cursor("head", ring.load_head(Ordering::Acquire))?;
            if free_bytes(head, tail, queue_size) < self.margin {
                return Ok(None);
            }

            let (offset, next_tail) = if would_wrap(tail, self.slot_size, queue_size) {
                // The remainder always holds WRAP; racing producers write the same value.
                ring.store_control(tail, WRAP)?;
                (0, self.slot_size)
            } else {
                (tail, self.next_slot(tail, queue_size))
            };

            match ring.cas_tail(tail, next_tail) {
                Ok(_) => {
                    if offset != tail {
                        debug!(tail, "producer wrapped to offset 0");
                    }
                    break offset;
                }
                Err(_) => hint::spin_loop(),
            }
        };

        // The consumer re-marks a slot before it moves past it, and our head
        // load above happened after that, so anything else means the cursors
        // have lost track of each other.
        let raw = ring.load_control(offset)?;
        if raw != UNCOMMITTED {
            return Err(self.violation(offset, raw, "reserved slot is still in use"));
        }
        Ok(Some(Reservation {
            offset,
            next_tail: None,
        }))
    }

    fn commit(&self, ring: &Ring, reservation: Reservation, len: usize) -> Result<()> {
        ring.store_control(reservation.offset, Control::Committed(len).encode())
    }

    fn consume(&self, ring: &Ring, buf: &mut [u8]) -> Result<Option<usize>> {
        let queue_size = ring.queue_size();
        let mut head = ring.check_cursor("head", ring.load_head(Ordering::Relaxed))?;
        let tail = ring.check_cursor("tail", ring.load_tail(Ordering::Acquire))?;
        if head == tail {
            return Ok(None);
        }

        let mut raw = ring.load_control(head)?;
        if raw == WRAP {
            debug!(head, "consumer wrapped to offset 0");
            head = 0;
            ring.store_head(head);
            if head == tail {
                return Ok(None);
            }
            raw = ring.load_control(head)?;
        }

        match Control::decode(raw, self.max_message_size) {
            Some(Control::Committed(len)) => {
                if buf.len() < len {
                    return Err(QueueError::BufferTooSmall {
                        len,
                        capacity: buf.len(),
                    });
                }
                ring.read_payload(head, &mut buf[..len])?;
                // Single re-mark; the release store of head below publishes it.
                ring.store_control(head, UNCOMMITTED)?;
                ring.store_head(self.next_slot(head, queue_size));
                Ok(Some(len))
            }
            // Reserved but the producer has not published yet. Never skip it:
            // order is reservation order.
            Some(Control::Uncommitted) | Some(Control::Unwritten) => Ok(None),
            Some(Control::Wrap) => Err(self.violation(head, raw, "wrap marker at offset 0")),
            None => Err(self.violation(head, raw, "corrupt control word")),
        }
    }
}
