//! Fixed binary layout of one metric's tier record.
//!
//! ```text
//! offset 0   (8B):  start_period   i64
//! offset 8   (8B):  end_period     i64
//! offset 16  (4B):  slot_count     i32
//! offset 20 + i*40, i in [0, capacity): slot i
//!   +0 period_start i64 | +8 min i64 | +16 max i64 | +24 avg i64 | +32 count u64
//! ```
//!
//! All integers are little-endian. The header and individual slots can be encoded and
//! decoded on their own so that an in-place update touches a single slot.

use crate::types::{PeriodAggregate, RecordHeader, TierRecord};
use thiserror::Error;

pub const H_START: usize = 0;
pub const H_END: usize = 8;
pub const H_SIZE: usize = 16;
/// Length of the record header: start (8) + end (8) + slot count (4).
pub const HEADER_SIZE: usize = 8 + 8 + 4;

/// Number of 8-byte fields per slot: period, min, max, avg, count.
pub const SLOT_FIELDS: usize = 5;
pub const SLOT_SIZE: usize = SLOT_FIELDS * 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("slot count {slot_count} outside [0, {capacity}]")]
    SlotCount { slot_count: i32, capacity: usize },

    #[error("slot {slot} period {period} does not precede slot {prev_slot} period {prev_period}")]
    PeriodOrder {
        slot: usize,
        period: i64,
        prev_slot: usize,
        prev_period: i64,
    },
}

/// Byte offset of slot `i` within a record.
#[inline]
pub const fn slot_offset(i: usize) -> usize {
    HEADER_SIZE + i * SLOT_SIZE
}

/// Codec bound to one tier's slot capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierRecordCodec {
    capacity: usize,
}

impl TierRecordCodec {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes reserved for one record.
    pub fn record_size(&self) -> usize {
        slot_offset(self.capacity)
    }

    pub fn encode_header(&self, header: &RecordHeader) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[H_START..H_START + 8].copy_from_slice(&header.start_period.to_le_bytes());
        buf[H_END..H_END + 8].copy_from_slice(&header.end_period.to_le_bytes());
        buf[H_SIZE..H_SIZE + 4].copy_from_slice(&header.slot_count.to_le_bytes());
        buf
    }

    /// Decodes a header and checks its slot count against the capacity.
    pub fn decode_header(&self, bytes: &[u8]) -> Result<RecordHeader, CodecError> {
        expect_len(bytes, HEADER_SIZE)?;
        let header = RecordHeader {
            start_period: get_i64(bytes, H_START),
            end_period: get_i64(bytes, H_END),
            slot_count: get_i32(bytes, H_SIZE),
        };
        if header.slot_count < 0 || header.slot_count as usize > self.capacity {
            return Err(CodecError::SlotCount {
                slot_count: header.slot_count,
                capacity: self.capacity,
            });
        }
        Ok(header)
    }

    pub fn encode_slot(&self, slot: &PeriodAggregate) -> [u8; SLOT_SIZE] {
        let mut buf = [0u8; SLOT_SIZE];
        buf[0..8].copy_from_slice(&slot.period_start.to_le_bytes());
        buf[8..16].copy_from_slice(&slot.min.to_le_bytes());
        buf[16..24].copy_from_slice(&slot.max.to_le_bytes());
        buf[24..32].copy_from_slice(&slot.avg.to_le_bytes());
        buf[32..40].copy_from_slice(&slot.count.to_le_bytes());
        buf
    }

    pub fn decode_slot(&self, bytes: &[u8]) -> Result<PeriodAggregate, CodecError> {
        expect_len(bytes, SLOT_SIZE)?;
        Ok(PeriodAggregate {
            period_start: get_i64(bytes, 0),
            min: get_i64(bytes, 8),
            max: get_i64(bytes, 16),
            avg: get_i64(bytes, 24),
            count: get_u64(bytes, 32),
        })
    }

    /// Encodes a contiguous run of slots.
    pub fn encode_slots(&self, slots: &[PeriodAggregate]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(slots.len() * SLOT_SIZE);
        for slot in slots {
            buf.extend_from_slice(&self.encode_slot(slot));
        }
        buf
    }

    /// Decodes `n` consecutive slots and checks that their periods strictly decrease.
    pub fn decode_slots(&self, bytes: &[u8], n: usize) -> Result<Vec<PeriodAggregate>, CodecError> {
        expect_len(bytes, n * SLOT_SIZE)?;
        let mut slots: Vec<PeriodAggregate> = Vec::with_capacity(n);
        for i in 0..n {
            let slot = self.decode_slot(&bytes[i * SLOT_SIZE..(i + 1) * SLOT_SIZE])?;
            if let Some(prev) = slots.last() {
                if slot.period_start >= prev.period_start {
                    return Err(CodecError::PeriodOrder {
                        slot: i,
                        period: slot.period_start,
                        prev_slot: i - 1,
                        prev_period: prev.period_start,
                    });
                }
            }
            slots.push(slot);
        }
        Ok(slots)
    }

    /// Encodes a whole record. Slots past `record.slots.len()` are zero-filled.
    pub fn encode_record(&self, record: &TierRecord) -> Result<Vec<u8>, CodecError> {
        if record.slots.len() > self.capacity {
            return Err(CodecError::SlotCount {
                slot_count: record.slots.len() as i32,
                capacity: self.capacity,
            });
        }
        let mut buf = vec![0u8; self.record_size()];
        let header = RecordHeader {
            slot_count: record.slots.len() as i32,
            ..record.header
        };
        buf[..HEADER_SIZE].copy_from_slice(&self.encode_header(&header));
        let slots = self.encode_slots(&record.slots);
        buf[HEADER_SIZE..HEADER_SIZE + slots.len()].copy_from_slice(&slots);
        Ok(buf)
    }

    /// Decodes a whole record, carrying only the populated slots.
    pub fn decode_record(&self, bytes: &[u8]) -> Result<TierRecord, CodecError> {
        expect_len(bytes, self.record_size())?;
        let header = self.decode_header(&bytes[..HEADER_SIZE])?;
        let n = header.slot_count as usize;
        let slots = self.decode_slots(&bytes[HEADER_SIZE..slot_offset(n)], n)?;
        Ok(TierRecord { header, slots })
    }
}

fn expect_len(bytes: &[u8], expected: usize) -> Result<(), CodecError> {
    if bytes.len() < expected {
        return Err(CodecError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

#[inline]
fn get_i64(buf: &[u8], at: usize) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(b)
}

#[inline]
fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

#[inline]
fn get_i32(buf: &[u8], at: usize) -> i32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    i32::from_le_bytes(b)
}
