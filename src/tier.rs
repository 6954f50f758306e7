//! One resolution level of the store: a log of fixed-size metric records plus the rollup
//! rules for its period duration and slot capacity.
//!
//! ## Concurrency contract
//!
//! Every operation on a record (`add_value`, `get_values`, `record_view`, `dump`) holds the
//! record's stripe lock, chosen as `index % lock_stripes`. Mutations of one record are
//! therefore linearizable and reads always observe a fully applied sample. Records in
//! different stripes never wait on each other. Record creation is serialized tier-wide.

use crate::codec::{slot_offset, CodecError, TierRecordCodec, HEADER_SIZE, SLOT_SIZE};
use crate::config::{format_duration_ms, TierConfig};
use crate::error::{Result, TierError};
use crate::log::{FileLog, IndexedLog, MemoryLog};
use crate::telemetry::{tier_metrics, TierEvent};
use crate::types::{MetricIndex, PeriodAggregate, TierRecord, TimestampMs, Value};
use crate::window::{Decision, PeriodWindow, WindowOutcome};

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Descriptive snapshot of a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierMetadata {
    pub name: String,
    pub pattern: Option<String>,
    pub period_duration_ms: i64,
    pub capacity: usize,
    /// Number of metric records.
    pub size: u64,
    pub record_size: usize,
    /// Earliest period start seen in this tier.
    pub start_period: Option<TimestampMs>,
    /// Latest period end seen in this tier.
    pub end_period: Option<TimestampMs>,
    pub data_size_bytes: u64,
}

impl fmt::Display for TierMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<i64>| v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "tier={} pattern={} period={} capacity={} records={} record_size={} start={} end={} data_bytes={}",
            self.name,
            self.pattern.as_deref().unwrap_or("-"),
            format_duration_ms(self.period_duration_ms),
            self.capacity,
            self.size,
            self.record_size,
            opt(self.start_period),
            opt(self.end_period),
            self.data_size_bytes
        )
    }
}

#[derive(Debug)]
pub struct Tier {
    config: TierConfig,
    codec: TierRecordCodec,
    window: PeriodWindow,
    log: Box<dyn IndexedLog>,
    stripes: Vec<Mutex<()>>,
    create_lock: Mutex<()>,
    start_period: AtomicI64,
    end_period: AtomicI64,
}

impl Tier {
    /// Binds `config` to `log`. Existing records are scanned to seed the period high-water
    /// marks; a record whose size or header does not fit the configuration fails the open.
    pub fn new(config: TierConfig, log: Box<dyn IndexedLog>) -> Result<Self> {
        config.validate()?;
        let codec = TierRecordCodec::new(config.capacity);
        let window = PeriodWindow::new(config.period_duration_ms, config.capacity);
        let stripes = (0..config.lock_stripes).map(|_| Mutex::new(())).collect();
        let tier = Self {
            config,
            codec,
            window,
            log,
            stripes,
            create_lock: Mutex::new(()),
            start_period: AtomicI64::new(i64::MAX),
            end_period: AtomicI64::new(i64::MIN),
        };
        tier.scan_headers()?;

        let records = tier.log.size();
        tier_metrics::record_size(tier.name(), records);
        tier.config.event_listener.on_event(TierEvent::TierOpened {
            tier: tier.name().to_string(),
            records,
            start_period: tier.start_period(),
            end_period: tier.end_period(),
        });
        Ok(tier)
    }

    /// A tier whose records live only in memory.
    pub fn in_memory(config: TierConfig) -> Result<Self> {
        Self::new(config, Box::new(MemoryLog::new()))
    }

    /// A tier backed by `<dir>/<name>.data` and `<dir>/<name>.index`.
    pub fn open<P: AsRef<Path>>(config: TierConfig, dir: P) -> Result<Self> {
        config.validate()?;
        let log = FileLog::open(dir, &config.name)?;
        Self::new(config, Box::new(log))
    }

    fn scan_headers(&self) -> Result<()> {
        let expected = self.codec.record_size();
        for index in 0..self.log.size() {
            let actual = self.log.record_size(index)?;
            if actual != expected {
                return Err(TierError::Config(format!(
                    "tier {}: record {} is {} bytes but capacity {} needs {}",
                    self.name(),
                    index,
                    actual,
                    self.config.capacity,
                    expected
                )));
            }
            let bytes = self.log.read(index, 0, HEADER_SIZE)?;
            let header = self
                .codec
                .decode_header(&bytes)
                .map_err(|e| self.inconsistent(index, e))?;
            if header.slot_count > 0 {
                self.tick_periods(header.start_period, header.end_period);
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    pub fn period_duration_ms(&self) -> i64 {
        self.config.period_duration_ms
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Number of metric records.
    pub fn size(&self) -> u64 {
        self.log.size()
    }

    /// Reserves a zeroed record for a new metric. Every call allocates a fresh index.
    pub fn create_new_metric(&self) -> Result<MetricIndex> {
        let _guard = self.create_lock.lock()?;
        let index = self.log.create(self.codec.record_size())?;
        tier_metrics::record_size(self.name(), index + 1);
        self.config.event_listener.on_event(TierEvent::MetricCreated {
            tier: self.name().to_string(),
            index,
        });
        Ok(index)
    }

    /// Offers one sample to the record at `index`; returns the evicted period, if any.
    pub fn add_value(
        &self,
        index: MetricIndex,
        timestamp_ms: TimestampMs,
        value: Value,
    ) -> Result<Option<PeriodAggregate>> {
        Ok(self.accept(index, timestamp_ms, value)?.evicted())
    }

    /// Offers one sample to the record at `index` and reports what happened to it.
    ///
    /// Only the header and slot 0 are read unless the sample opens a new period; only the
    /// bytes that changed are written back.
    pub fn accept(
        &self,
        index: MetricIndex,
        timestamp_ms: TimestampMs,
        value: Value,
    ) -> Result<WindowOutcome> {
        self.accept_then(index, timestamp_ms, value, |_| ())
            .map(|(outcome, ())| outcome)
    }

    /// Like [`Tier::accept`], but runs `then` with the outcome while the record's stripe
    /// lock is still held. Work done in `then` is ordered with every other sample for the
    /// same record, so periods evicted from this record are handed on in eviction order.
    ///
    /// Locks taken inside `then` must belong to other tiers, always in the same tier order.
    pub fn accept_then<R, F>(
        &self,
        index: MetricIndex,
        timestamp_ms: TimestampMs,
        value: Value,
        then: F,
    ) -> Result<(WindowOutcome, R)>
    where
        F: FnOnce(WindowOutcome) -> R,
    {
        let started = Instant::now();
        self.check_index(index)?;
        let period = self
            .window
            .period_of(timestamp_ms)
            .ok_or_else(|| TierError::InvalidTimestamp {
                tier: self.name().to_string(),
                timestamp_ms,
            })?;

        let (outcome, next) = {
            let _guard = self.stripe(index)?;
            let outcome = self.apply(index, period, value)?;
            (outcome, then(outcome))
        };

        match outcome {
            WindowOutcome::Dropped => {}
            WindowOutcome::RolledWithEviction(evicted) => {
                self.tick_periods(period, self.window.period_end(period));
                tier_metrics::record_eviction(self.name());
                self.config.event_listener.on_event(TierEvent::PeriodEvicted {
                    tier: self.name().to_string(),
                    index,
                    period_start: evicted.period_start,
                });
            }
            _ => self.tick_periods(period, self.window.period_end(period)),
        }
        tier_metrics::record_sample(self.name(), outcome.as_str(), started.elapsed());
        Ok((outcome, next))
    }

    fn apply(&self, index: MetricIndex, period: TimestampMs, value: Value) -> Result<WindowOutcome> {
        let head = self.log.read(index, 0, slot_offset(1))?;
        let header = self
            .codec
            .decode_header(&head[..HEADER_SIZE])
            .map_err(|e| self.inconsistent(index, e))?;
        let n = header.slot_count as usize;

        let mut record = TierRecord {
            header,
            slots: Vec::with_capacity(n + 1),
        };
        if n > 0 {
            let slot0 = self
                .codec
                .decode_slot(&head[HEADER_SIZE..])
                .map_err(|e| self.inconsistent(index, e))?;
            record.slots.push(slot0);
        }

        let current = record.current().map(|s| s.period_start);
        match self.window.decide(current, period) {
            Decision::Drop => {
                if let Some(current_period) = current {
                    self.config.event_listener.on_event(TierEvent::SampleDropped {
                        tier: self.name().to_string(),
                        index,
                        period,
                        current_period,
                    });
                }
                return Ok(WindowOutcome::Dropped);
            }
            Decision::Roll if n > 1 => {
                let mut all = head[HEADER_SIZE..].to_vec();
                all.extend(self.log.read(index, slot_offset(1), (n - 1) * SLOT_SIZE)?);
                record.slots = self
                    .codec
                    .decode_slots(&all, n)
                    .map_err(|e| self.inconsistent(index, e))?;
            }
            _ => {}
        }

        let outcome = self
            .window
            .accept(&mut record, period, value)
            .map_err(|e| self.inconsistent(index, e))?;

        match outcome {
            WindowOutcome::UpdatedInPlace => {
                let bytes = self.codec.encode_slot(&record.slots[0]);
                self.log.write(index, slot_offset(0), &bytes)?;
            }
            WindowOutcome::Initialized
            | WindowOutcome::RolledNoEviction
            | WindowOutcome::RolledWithEviction(_) => {
                let mut bytes = self.codec.encode_header(&record.header).to_vec();
                bytes.extend(self.codec.encode_slots(&record.slots));
                self.log.write(index, 0, &bytes)?;
            }
            WindowOutcome::Dropped => {}
        }
        Ok(outcome)
    }

    /// Completed periods for `index`, oldest first. The open current period is excluded.
    pub fn get_values(&self, index: MetricIndex) -> Result<Vec<PeriodAggregate>> {
        self.check_index(index)?;
        let _guard = self.stripe(index)?;
        let header_bytes = self.log.read(index, 0, HEADER_SIZE)?;
        let header = self
            .codec
            .decode_header(&header_bytes)
            .map_err(|e| self.inconsistent(index, e))?;
        let n = header.slot_count as usize;
        if n <= 1 {
            return Ok(Vec::new());
        }
        let bytes = self.log.read(index, slot_offset(1), (n - 1) * SLOT_SIZE)?;
        let mut slots = self
            .codec
            .decode_slots(&bytes, n - 1)
            .map_err(|e| self.inconsistent(index, e))?;
        slots.reverse();
        Ok(slots)
    }

    /// Consistent snapshot of the record at `index`.
    pub fn record_view(&self, index: MetricIndex) -> Result<TierRecord> {
        self.check_index(index)?;
        let _guard = self.stripe(index)?;
        let bytes = self.log.read(index, 0, self.codec.record_size())?;
        self.codec
            .decode_record(&bytes)
            .map_err(|e| self.inconsistent(index, e))
    }

    /// Human-readable dump of a record's header and, optionally, its populated slots.
    pub fn dump(&self, index: MetricIndex, include_periods: bool) -> Result<String> {
        let record = self.record_view(index)?;
        let mut out = format!(
            "Series [{}/{}] start={} end={} slots={}/{}",
            self.name(),
            index,
            record.header.start_period,
            record.header.end_period,
            record.header.slot_count,
            self.capacity()
        );
        if include_periods {
            for (i, slot) in record.slots.iter().enumerate() {
                out.push_str(&format!("\n  [{}] {}", i, slot));
            }
        }
        Ok(out)
    }

    /// Earliest period start accepted by any record, `None` before the first sample.
    pub fn start_period(&self) -> Option<TimestampMs> {
        match self.start_period.load(Ordering::Acquire) {
            i64::MAX => None,
            v => Some(v),
        }
    }

    /// Latest period end accepted by any record, `None` before the first sample.
    pub fn end_period(&self) -> Option<TimestampMs> {
        match self.end_period.load(Ordering::Acquire) {
            i64::MIN => None,
            v => Some(v),
        }
    }

    pub fn metadata(&self) -> TierMetadata {
        TierMetadata {
            name: self.config.name.clone(),
            pattern: self.config.pattern.clone(),
            period_duration_ms: self.config.period_duration_ms,
            capacity: self.config.capacity,
            size: self.log.size(),
            record_size: self.codec.record_size(),
            start_period: self.start_period(),
            end_period: self.end_period(),
            data_size_bytes: self.log.data_size_bytes(),
        }
    }

    /// Flushes the underlying log to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    fn check_index(&self, index: MetricIndex) -> Result<()> {
        let size = self.log.size();
        if index >= size {
            return Err(TierError::InvalidIndex {
                tier: self.name().to_string(),
                index,
                size,
            });
        }
        Ok(())
    }

    fn stripe(&self, index: MetricIndex) -> Result<MutexGuard<'_, ()>> {
        let stripe = (index % self.stripes.len() as u64) as usize;
        Ok(self.stripes[stripe].lock()?)
    }

    fn tick_periods(&self, start: TimestampMs, end: TimestampMs) {
        self.start_period.fetch_min(start, Ordering::AcqRel);
        self.end_period.fetch_max(end, Ordering::AcqRel);
    }

    fn inconsistent(&self, index: MetricIndex, err: CodecError) -> TierError {
        let details = err.to_string();
        self.config.event_listener.on_event(TierEvent::RecordCorrupted {
            tier: self.name().to_string(),
            index,
            details: details.clone(),
        });
        TierError::InternalConsistency {
            tier: self.name().to_string(),
            index,
            details,
        }
    }
}
