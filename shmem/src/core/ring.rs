//! Ring buffer arithmetic shared by every queue strategy, plus the
//! bounds-checked view of the mapped region the strategies operate on.
//!
//! Layout of a queue segment:
//!
//! ```text
//! [head: u32][tail: u32][data region: queue_size bytes ...]
//! ```
//!
//! `head` and `tail` are byte offsets into the data region. Every record or
//! slot starts with a 4-byte control word that is either a payload length or
//! one of the sentinels below.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use tracing::error;

use super::SharedSegment;
use crate::errors::{QueueError, Result};

pub const HEADER_SIZE: usize = 8;
pub const CONTROL_SIZE: usize = 4;

pub const UNWRITTEN: i32 = 0;
pub const WRAP: i32 = -1;
pub const UNCOMMITTED: i32 = -2;

const HEAD_OFFSET: usize = 0;
const TAIL_OFFSET: usize = 4;

#[inline]
pub const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Bytes a variable-length record of `len` payload bytes occupies.
#[inline]
pub const fn record_stride(len: usize) -> usize {
    align4(CONTROL_SIZE + len)
}

/// Bytes every fixed-size MPSC slot occupies.
#[inline]
pub const fn slot_size(max_message_size: usize) -> usize {
    record_stride(max_message_size)
}

#[inline]
pub fn used_bytes(head: usize, tail: usize, queue_size: usize) -> usize {
    if tail >= head {
        tail - head
    } else {
        queue_size - (head - tail)
    }
}

#[inline]
pub fn free_bytes(head: usize, tail: usize, queue_size: usize) -> usize {
    queue_size - used_bytes(head, tail, queue_size)
}

/// Whether a record of `record_len` bytes starting at `offset` would run past
/// the end of the data region.
#[inline]
pub fn would_wrap(offset: usize, record_len: usize, queue_size: usize) -> bool {
    offset + record_len > queue_size
}

/// Decoded control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Unwritten,
    Wrap,
    Uncommitted,
    Committed(usize),
}

impl Control {
    /// Returns `None` for values that are neither a sentinel nor a length in
    /// `1..=max_len`.
    pub fn decode(raw: i32, max_len: usize) -> Option<Control> {
        match raw {
            UNWRITTEN => Some(Control::Unwritten),
            WRAP => Some(Control::Wrap),
            UNCOMMITTED => Some(Control::Uncommitted),
            len if len > 0 && (len as usize) <= max_len => Some(Control::Committed(len as usize)),
            _ => None,
        }
    }

    pub fn encode(self) -> i32 {
        match self {
            Control::Unwritten => UNWRITTEN,
            Control::Wrap => WRAP,
            Control::Uncommitted => UNCOMMITTED,
            Control::Committed(len) => len as i32,
        }
    }
}

/// The mapped header and data region of one queue.
///
/// Raw access is confined to this type: every offset handed in is checked
/// against the data region before it is turned into a pointer.
pub(crate) struct Ring {
    segment: SharedSegment,
    base: NonNull<u8>,
    queue_size: usize,
}

// The mapping is only reached through atomics and bounds-checked copies.
unsafe impl Send for Ring {}

impl Ring {
    pub(crate) fn new(segment: SharedSegment, queue_size: usize) -> Result<Ring> {
        let needed = HEADER_SIZE + queue_size;
        if segment.len() < needed {
            return Err(QueueError::SegmentSize {
                path: segment.link_path().to_path_buf(),
                expected: needed,
                actual: segment.len(),
            });
        }
        let base = NonNull::new(segment.as_ptr())
            .ok_or_else(|| QueueError::Config("segment is not mapped".to_string()))?;
        if base.as_ptr() as usize % CONTROL_SIZE != 0 {
            return Err(QueueError::Config(format!(
                "segment mapped at unaligned address {:p}",
                base.as_ptr()
            )));
        }
        Ok(Ring {
            segment,
            base,
            queue_size,
        })
    }

    #[inline]
    pub(crate) fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub(crate) fn is_owner(&self) -> bool {
        self.segment.is_owner()
    }

    #[inline]
    fn header_word(&self, offset: usize) -> &AtomicU32 {
        // The mapping is page aligned and outlives `self`.
        unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU32) }
    }

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(HEADER_SIZE) }
    }

    #[inline]
    pub(crate) fn load_head(&self, order: Ordering) -> usize {
        self.header_word(HEAD_OFFSET).load(order) as usize
    }

    #[inline]
    pub(crate) fn store_head(&self, head: usize) {
        self.header_word(HEAD_OFFSET)
            .store(head as u32, Ordering::Release)
    }

    #[inline]
    pub(crate) fn load_tail(&self, order: Ordering) -> usize {
        self.header_word(TAIL_OFFSET).load(order) as usize
    }

    #[inline]
    pub(crate) fn store_tail(&self, tail: usize) {
        self.header_word(TAIL_OFFSET)
            .store(tail as u32, Ordering::Release)
    }

    /// Moves `tail` from `current` to `new`, failing with the observed value
    /// when another producer got there first.
    #[inline]
    pub(crate) fn cas_tail(&self, current: usize, new: usize) -> std::result::Result<usize, usize> {
        self.header_word(TAIL_OFFSET)
            .compare_exchange_weak(
                current as u32,
                new as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|v| v as usize)
            .map_err(|v| v as usize)
    }

    /// Both cursors back to zero. Only the owner calls this, before anyone
    /// else attaches.
    pub(crate) fn reset(&self) {
        self.header_word(HEAD_OFFSET).store(0, Ordering::Release);
        self.header_word(TAIL_OFFSET).store(0, Ordering::Release);
    }

    /// Validates a cursor read from the header.
    pub(crate) fn check_cursor(&self, name: &str, offset: usize) -> Result<usize> {
        if offset >= self.queue_size || offset % CONTROL_SIZE != 0 {
            error!(offset, queue_size = self.queue_size, "{} cursor out of range", name);
            return Err(QueueError::violation(
                offset,
                format!("{} cursor outside a {} byte region", name, self.queue_size),
            ));
        }
        Ok(offset)
    }

    fn control_word(&self, offset: usize) -> Result<&AtomicI32> {
        if offset % CONTROL_SIZE != 0 || offset + CONTROL_SIZE > self.queue_size {
            return Err(QueueError::violation(
                offset,
                "control word outside the data region",
            ));
        }
        Ok(unsafe { &*(self.data_ptr().add(offset) as *const AtomicI32) })
    }

    #[inline]
    pub(crate) fn load_control(&self, offset: usize) -> Result<i32> {
        Ok(self.control_word(offset)?.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn store_control(&self, offset: usize, value: i32) -> Result<()> {
        self.control_word(offset)?.store(value, Ordering::Release);
        Ok(())
    }

    fn payload_bounds(&self, offset: usize, len: usize) -> Result<usize> {
        let start = offset + CONTROL_SIZE;
        if start + len > self.queue_size {
            return Err(QueueError::violation(
                offset,
                format!("{} byte payload runs past the data region", len),
            ));
        }
        Ok(start)
    }

    /// Copies `payload` behind the control word at `offset`.
    pub(crate) fn write_payload(&self, offset: usize, payload: &[u8]) -> Result<()> {
        let start = self.payload_bounds(offset, payload.len())?;
        unsafe {
            ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.data_ptr().add(start),
                payload.len(),
            );
        }
        Ok(())
    }

    /// Copies the payload behind the control word at `offset` into `dst`.
    pub(crate) fn read_payload(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        let start = self.payload_bounds(offset, dst.len())?;
        unsafe {
            ptr::copy_nonoverlapping(self.data_ptr().add(start), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    pub(crate) fn used_bytes(&self) -> usize {
        let head = self.load_head(Ordering::Acquire);
        let tail = self.load_tail(Ordering::Acquire);
        used_bytes(head, tail, self.queue_size)
    }

    pub(crate) fn dispose(&mut self) {
        self.segment.dispose();
    }
}
