use std::sync::atomic::Ordering;

use tracing::{debug, error};

use super::{Reservation, Strategy};
use crate::core::ring::{free_bytes, record_stride, would_wrap, Control, Ring, WRAP};
use crate::core::QueueKind;
use crate::errors::{QueueError, Result};

/// Variable-length records, one producer, one consumer.
///
/// Each record is `[len: i32][payload][pad to 4]`. The producer never needs a
/// read-modify-write on `tail`; it publishes the length word, then the tail.
pub(crate) struct Spsc {
    max_message_size: usize,
}

impl Spsc {
    pub(crate) fn new(max_message_size: usize) -> Spsc {
        Spsc { max_message_size }
    }
}

impl Strategy for Spsc {
    fn kind(&self) -> QueueKind {
        QueueKind::Spsc
    }

    fn reserve(&self, ring: &Ring, len: usize) -> Result<Option<Reservation>> {
        let queue_size = ring.queue_size();
        let head = ring.check_cursor("head", ring.load_head(Ordering::Acquire))?;
        // Only this producer moves the tail.
        let tail = ring.check_cursor("tail", ring.load_tail(Ordering::Relaxed))?;

        let stride = record_stride(len);
        let (offset, gap) = if would_wrap(tail, stride, queue_size) {
            (0, queue_size - tail)
        } else {
            (tail, 0)
        };
        // Strictly more free space than the record needs: filling the region
        // exactly would make tail == head, which reads as empty.
        if free_bytes(head, tail, queue_size) <= stride + gap {
            return Ok(None);
        }
        if gap > 0 {
            ring.store_control(tail, WRAP)?;
            debug!(tail, gap, "producer wrapped to offset 0");
        }

        let mut next_tail = offset + stride;
        if next_tail >= queue_size {
            next_tail = 0;
        }
        Ok(Some(Reservation {
            offset,
            next_tail: Some(next_tail),
        }))
    }

    fn commit(&self, ring: &Ring, reservation: Reservation, len: usize) -> Result<()> {
        ring.store_control(reservation.offset, Control::Committed(len).encode())?;
        if let Some(next_tail) = reservation.next_tail {
            ring.store_tail(next_tail);
        }
        Ok(())
    }

    fn consume(&self, ring: &Ring, buf: &mut [u8]) -> Result<Option<usize>> {
        let queue_size = ring.queue_size();
        // Only this consumer moves the head.
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
                let stride = record_stride(len);
                if head + stride > queue_size {
                    error!(head, len, queue_size, "record runs past the data region");
                    return Err(QueueError::violation(
                        head,
                        format!("{} byte record runs past the data region", len),
                    ));
                }
                ring.read_payload(head, &mut buf[..len])?;

                let mut next_head = head + stride;
                if next_head >= queue_size {
                    next_head = 0;
                }
                ring.store_head(next_head);
                Ok(Some(len))
            }
            // Only reachable while a publish at the wrap boundary is in flight.
            Some(Control::Unwritten) | Some(Control::Uncommitted) => Ok(None),
            Some(Control::Wrap) => {
                error!(head, "wrap marker at offset 0");
                Err(QueueError::violation(head, "wrap marker at offset 0"))
            }
            None => {
                error!(head, raw, "corrupt control word");
                Err(QueueError::violation(
                    head,
                    format!("control word {} is neither a length nor a sentinel", raw),
                ))
            }
        }
    }
}
