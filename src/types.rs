use std::fmt;

/// Metric index: identifies one metric's record within a tier's log.
pub type MetricIndex = u64;

/// Timestamp type (milliseconds since epoch).
pub type TimestampMs = i64;

/// Value type. Non-numeric metric kinds are filtered out before reaching the store.
pub type Value = i64;

/// Statistics for one period of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodAggregate {
    pub period_start: TimestampMs,
    pub min: Value,
    pub max: Value,
    /// Running estimate, see [`PeriodAggregate::absorb`]. Not an arithmetic mean.
    pub avg: Value,
    pub count: u64,
}

impl PeriodAggregate {
    /// A period holding exactly one sample.
    pub fn first(period_start: TimestampMs, value: Value) -> Self {
        Self {
            period_start,
            min: value,
            max: value,
            avg: value,
            count: 1,
        }
    }

    /// Folds one more sample of the same period into the aggregate.
    ///
    /// The average is the pairwise recurrence `(avg + value) / 2`, truncated toward zero,
    /// so later samples weigh more than earlier ones. Dashboards fed from this store rely on
    /// exactly these numbers.
    pub fn absorb(&mut self, value: Value) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.avg = if self.count == 0 {
            value
        } else {
            self.avg.wrapping_add(value) / 2
        };
        self.count += 1;
    }
}

impl fmt::Display for PeriodAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "period={} min={} max={} avg={} count={}",
            self.period_start, self.min, self.max, self.avg, self.count
        )
    }
}

/// Fixed-size header at the start of every tier record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    /// Start of the current (slot 0) period.
    pub start_period: TimestampMs,
    /// Exclusive end of the current period.
    pub end_period: TimestampMs,
    pub slot_count: i32,
}

/// Decoded view of one metric's record: header plus the populated slots.
///
/// `slots[0]` is the current, possibly still open, period; higher indices are older.
/// Slots past `slot_count` are not carried.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TierRecord {
    pub header: RecordHeader,
    pub slots: Vec<PeriodAggregate>,
}

impl TierRecord {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The current period, if any sample has been accepted.
    pub fn current(&self) -> Option<&PeriodAggregate> {
        self.slots.first()
    }

    /// Completed periods, oldest first. The open slot 0 is excluded.
    pub fn completed_periods(&self) -> Vec<PeriodAggregate> {
        self.slots.iter().skip(1).rev().copied().collect()
    }
}
