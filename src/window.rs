//! Period window: decides what an incoming sample does to a metric's record.

use crate::codec::CodecError;
use crate::types::{PeriodAggregate, TierRecord, TimestampMs, Value};

/// What happened to a record when a sample was offered to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// First sample for the record.
    Initialized,
    /// Sample folded into the current period.
    UpdatedInPlace,
    /// New current period opened; the record had spare slots.
    RolledNoEviction,
    /// New current period opened; the oldest period fell off the end and is returned.
    RolledWithEviction(PeriodAggregate),
    /// Sample older than the current period. Nothing changed.
    Dropped,
}

impl WindowOutcome {
    pub fn evicted(&self) -> Option<PeriodAggregate> {
        match self {
            WindowOutcome::RolledWithEviction(agg) => Some(*agg),
            _ => None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, WindowOutcome::Dropped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowOutcome::Initialized => "initialized",
            WindowOutcome::UpdatedInPlace => "updated",
            WindowOutcome::RolledNoEviction => "rolled",
            WindowOutcome::RolledWithEviction(_) => "rolled_evicted",
            WindowOutcome::Dropped => "dropped",
        }
    }
}

/// Action selected from the current period alone, before the rest of the record is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Initialize,
    Update,
    Roll,
    Drop,
}

/// Rollup rules for one tier resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    period_duration_ms: i64,
    capacity: usize,
}

impl PeriodWindow {
    pub fn new(period_duration_ms: i64, capacity: usize) -> Self {
        Self {
            period_duration_ms,
            capacity,
        }
    }

    pub fn period_duration_ms(&self) -> i64 {
        self.period_duration_ms
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start of the period containing `timestamp_ms` (floor, also for negative timestamps).
    ///
    /// `None` when that start lies below `i64::MIN`, which happens for timestamps in the
    /// first partial period of the `i64` range.
    pub fn period_of(&self, timestamp_ms: TimestampMs) -> Option<TimestampMs> {
        timestamp_ms
            .div_euclid(self.period_duration_ms)
            .checked_mul(self.period_duration_ms)
    }

    /// Exclusive end of the period starting at `period`.
    pub fn period_end(&self, period: TimestampMs) -> TimestampMs {
        period.saturating_add(self.period_duration_ms)
    }

    pub fn decide(&self, current: Option<TimestampMs>, incoming: TimestampMs) -> Decision {
        match current {
            None => Decision::Initialize,
            Some(c) if incoming == c => Decision::Update,
            Some(c) if incoming > c => Decision::Roll,
            Some(_) => Decision::Drop,
        }
    }

    /// Applies one sample of period `incoming` to `record`.
    ///
    /// `record.slots` must hold every populated slot when the sample rolls the window; for
    /// an initialize or in-place update only slot 0 is consulted.
    pub fn accept(
        &self,
        record: &mut TierRecord,
        incoming: TimestampMs,
        value: Value,
    ) -> Result<WindowOutcome, CodecError> {
        if record.slots.len() > self.capacity {
            return Err(CodecError::SlotCount {
                slot_count: record.slots.len() as i32,
                capacity: self.capacity,
            });
        }

        let current = record.current().map(|s| s.period_start);
        match self.decide(current, incoming) {
            Decision::Initialize => {
                record.slots.push(PeriodAggregate::first(incoming, value));
                self.open_period(record, incoming);
                Ok(WindowOutcome::Initialized)
            }
            Decision::Update => {
                if let Some(slot0) = record.slots.first_mut() {
                    slot0.absorb(value);
                }
                Ok(WindowOutcome::UpdatedInPlace)
            }
            Decision::Roll => {
                record
                    .slots
                    .insert(0, PeriodAggregate::first(incoming, value));
                let evicted = if record.slots.len() > self.capacity {
                    record.slots.pop()
                } else {
                    None
                };
                self.open_period(record, incoming);
                Ok(match evicted {
                    Some(agg) => WindowOutcome::RolledWithEviction(agg),
                    None => WindowOutcome::RolledNoEviction,
                })
            }
            Decision::Drop => Ok(WindowOutcome::Dropped),
        }
    }

    fn open_period(&self, record: &mut TierRecord, period: TimestampMs) {
        record.header.start_period = period;
        record.header.end_period = self.period_end(period);
        record.header.slot_count = record.slots.len() as i32;
    }
}
