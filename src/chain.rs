//! Chains tiers from finest to coarsest resolution. A period evicted from one tier becomes
//! a sample of the next: its average, stamped at the period's start.

use crate::error::{Result, TierError};
use crate::telemetry::TierEvent;
use crate::tier::Tier;
use crate::types::{MetricIndex, PeriodAggregate, TimestampMs, Value};
use crate::window::WindowOutcome;

/// One tier's part in an ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeStep {
    /// Position of the tier in the chain (0 = finest).
    pub tier: usize,
    pub index: MetricIndex,
    pub timestamp_ms: TimestampMs,
    pub value: Value,
    pub outcome: WindowOutcome,
}

/// Everything one sample caused along the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cascade {
    pub steps: Vec<CascadeStep>,
    /// Period evicted from the coarsest tier, for an export collaborator.
    pub exported: Option<PeriodAggregate>,
}

#[derive(Debug)]
pub struct TierChain {
    tiers: Vec<Tier>,
}

impl TierChain {
    /// Builds a chain. Period durations must strictly increase along `tiers`.
    pub fn new(tiers: Vec<Tier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(TierError::Config("tier chain needs at least one tier".to_string()));
        }
        for pair in tiers.windows(2) {
            if pair[1].period_duration_ms() <= pair[0].period_duration_ms() {
                return Err(TierError::Config(format!(
                    "tier {} ({} ms) must be coarser than tier {} ({} ms)",
                    pair[1].name(),
                    pair[1].period_duration_ms(),
                    pair[0].name(),
                    pair[0].period_duration_ms()
                )));
            }
        }
        Ok(Self { tiers })
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn tier(&self, position: usize) -> Option<&Tier> {
        self.tiers.get(position)
    }

    pub fn tier_by_name(&self, name: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.name() == name)
    }

    /// Allocates a record for one new metric in every tier, finest first.
    pub fn create_metric(&self) -> Result<Vec<MetricIndex>> {
        self.tiers.iter().map(|t| t.create_new_metric()).collect()
    }

    /// Feeds a sample to the finest tier and forwards evictions down the chain.
    ///
    /// `indices[i]` is the metric's index in tier `i`. A failure in a coarser tier is
    /// reported through that tier's event listener and returned; the finer tiers keep the
    /// sample.
    ///
    /// Each tier's record stays locked until the coarser tiers have taken its evicted
    /// period, so concurrent ingests of one metric reach every tier in the same order.
    /// Locks are always taken finest first.
    pub fn ingest(
        &self,
        indices: &[MetricIndex],
        timestamp_ms: TimestampMs,
        value: Value,
    ) -> Result<Cascade> {
        if indices.len() != self.tiers.len() {
            return Err(TierError::Config(format!(
                "expected {} tier indices, got {}",
                self.tiers.len(),
                indices.len()
            )));
        }

        let mut cascade = Cascade::default();
        self.forward(0, indices, timestamp_ms, value, &mut cascade)?;
        cascade.exported = cascade
            .steps
            .last()
            .filter(|s| s.tier + 1 == self.tiers.len())
            .and_then(|s| s.outcome.evicted());
        Ok(cascade)
    }

    fn forward(
        &self,
        pos: usize,
        indices: &[MetricIndex],
        timestamp_ms: TimestampMs,
        value: Value,
        cascade: &mut Cascade,
    ) -> Result<()> {
        let tier = &self.tiers[pos];
        let index = indices[pos];
        let accepted = tier.accept_then(index, timestamp_ms, value, |outcome| {
            cascade.steps.push(CascadeStep {
                tier: pos,
                index,
                timestamp_ms,
                value,
                outcome,
            });
            match outcome.evicted() {
                Some(evicted) if pos + 1 < self.tiers.len() => self.forward(
                    pos + 1,
                    indices,
                    evicted.period_start,
                    evicted.avg,
                    cascade,
                ),
                _ => Ok(()),
            }
        });
        match accepted {
            Ok((_, next)) => next,
            Err(e) => {
                if pos > 0 {
                    tier.config().event_listener.on_event(TierEvent::CascadeFailed {
                        from_tier: self.tiers[pos - 1].name().to_string(),
                        to_tier: tier.name().to_string(),
                        index,
                        error: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Flushes every tier's log. Each failure is reported as [`TierEvent::SyncFailed`];
    /// the first one is returned after all tiers were attempted.
    pub fn sync(&self) -> Result<()> {
        let mut first = None;
        for tier in &self.tiers {
            if let Err(e) = tier.sync() {
                tier.config().event_listener.on_event(TierEvent::SyncFailed {
                    tier: tier.name().to_string(),
                    error: e.to_string(),
                });
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
