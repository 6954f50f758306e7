//! File-backed tier chain opened from a [`StoreConfig`].

use crate::chain::{Cascade, TierChain};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::tier::{Tier, TierMetadata};
use crate::types::{MetricIndex, TimestampMs, Value};

use std::fs;

/// Chain of file-backed tiers living under one data directory.
#[derive(Debug)]
pub struct TierStore {
    chain: TierChain,
    config: StoreConfig,
}

impl TierStore {
    /// Creates `data_dir` if needed and opens every configured tier, restoring existing
    /// records.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let tier_configs = config.tier_configs()?;
        fs::create_dir_all(&config.data_dir)?;
        let tiers = tier_configs
            .into_iter()
            .map(|tc| Tier::open(tc, &config.data_dir))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            chain: TierChain::new(tiers)?,
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn chain(&self) -> &TierChain {
        &self.chain
    }

    pub fn tier(&self, name: &str) -> Option<&Tier> {
        self.chain.tier_by_name(name)
    }

    /// Allocates a record for a new metric in every tier.
    pub fn create_metric(&self) -> Result<Vec<MetricIndex>> {
        self.chain.create_metric()
    }

    pub fn ingest(
        &self,
        indices: &[MetricIndex],
        timestamp_ms: TimestampMs,
        value: Value,
    ) -> Result<Cascade> {
        self.chain.ingest(indices, timestamp_ms, value)
    }

    pub fn metadata(&self) -> Vec<TierMetadata> {
        self.chain.tiers().iter().map(|t| t.metadata()).collect()
    }

    pub fn sync(&self) -> Result<()> {
        self.chain.sync()
    }
}

impl Drop for TierStore {
    fn drop(&mut self) {
        // Failures already went to the listener as SyncFailed.
        let _ = self.chain.sync();
    }
}
