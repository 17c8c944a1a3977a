//! Fixed-size sample record producers send to measure ordering and latency.
//! The queue itself never looks inside payloads.

use std::collections::HashMap;
use std::convert::TryInto;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub const PROBE_LEN: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    pub timestamp_us: u64,
    pub seq: u64,
    pub producer_id: u32,
}

impl Probe {
    pub fn new(producer_id: u32, seq: u64) -> Probe {
        Probe {
            timestamp_us: now_us(),
            seq,
            producer_id,
        }
    }

    pub fn encode(&self) -> [u8; PROBE_LEN] {
        let mut bytes = [0u8; PROBE_LEN];
        bytes[0..8].copy_from_slice(&self.timestamp_us.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.seq.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.producer_id.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Option<Probe> {
        if bytes.len() != PROBE_LEN {
            return None;
        }
        Some(Probe {
            timestamp_us: u64::from_le_bytes(bytes[0..8].try_into().ok()?),
            seq: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            producer_id: u32::from_le_bytes(bytes[16..20].try_into().ok()?),
        })
    }

    pub fn latency_us(&self, now_us: u64) -> u64 {
        now_us.saturating_sub(self.timestamp_us)
    }
}

pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("producer {producer_id}: expected seq {expected}, got {got}")]
pub struct SequenceGap {
    pub producer_id: u32,
    pub expected: u64,
    pub got: u64,
}

/// Checks that every producer's sequence numbers arrive as 0, 1, 2, ...
#[derive(Debug, Default)]
pub struct SequenceTracker {
    next: HashMap<u32, u64>,
    observed: u64,
}

impl SequenceTracker {
    pub fn new() -> SequenceTracker {
        SequenceTracker::default()
    }

    /// Records `probe`. On a gap or duplicate the tracker resynchronizes to
    /// the received sequence so later probes are judged against it.
    pub fn observe(&mut self, probe: &Probe) -> Result<(), SequenceGap> {
        self.observed += 1;
        let next = self.next.entry(probe.producer_id).or_insert(0);
        let expected = *next;
        *next = probe.seq + 1;
        if probe.seq == expected {
            Ok(())
        } else {
            Err(SequenceGap {
                producer_id: probe.producer_id,
                expected,
                got: probe.seq,
            })
        }
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Next expected sequence for `producer_id`, i.e. how many it has sent.
    pub fn received_from(&self, producer_id: u32) -> u64 {
        self.next.get(&producer_id).copied().unwrap_or(0)
    }

    pub fn producers(&self) -> usize {
        self.next.len()
    }
}
