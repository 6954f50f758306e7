//! Tier definitions and store configuration.
//!
//! A tier is described by a pattern pairing its period duration with the span it retains,
//! e.g. `p=1m,t=1h` keeps sixty one-minute periods. Store configuration is layered from
//! defaults, an optional TOML file and `TIERSTORE_*` environment variables.

use crate::error::{Result, TierError};
use crate::telemetry::{noop_event_listener, TierEventListener};

use config::{Config, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Default number of lock stripes per tier.
pub const DEFAULT_LOCK_STRIPES: usize = 64;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "tierstore.toml";

const MS_PER_SECOND: i64 = 1_000;
const UNITS: [(&str, i64); 6] = [
    ("w", 7 * 24 * 3_600 * MS_PER_SECOND),
    ("d", 24 * 3_600 * MS_PER_SECOND),
    ("h", 3_600 * MS_PER_SECOND),
    ("m", 60 * MS_PER_SECOND),
    ("s", MS_PER_SECOND),
    ("ms", 1),
];

/// Parsed `p=<period>,t=<span>` tier pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPattern {
    pub period_duration_ms: i64,
    pub tier_duration_ms: i64,
}

impl TierPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut period = None;
        let mut span = None;
        for part in pattern.split(',') {
            let part = part.trim();
            let (key, value) = part.split_once('=').ok_or_else(|| {
                TierError::Config(format!("tier pattern {:?}: expected key=value, got {:?}", pattern, part))
            })?;
            let slot = match key.trim() {
                "p" => &mut period,
                "t" => &mut span,
                other => {
                    return Err(TierError::Config(format!(
                        "tier pattern {:?}: unknown key {:?}",
                        pattern, other
                    )))
                }
            };
            if slot.is_some() {
                return Err(TierError::Config(format!(
                    "tier pattern {:?}: duplicate key {:?}",
                    pattern,
                    key.trim()
                )));
            }
            *slot = Some(parse_duration_ms(value.trim())?);
        }

        let (period_duration_ms, tier_duration_ms) = match (period, span) {
            (Some(p), Some(t)) => (p, t),
            _ => {
                return Err(TierError::Config(format!(
                    "tier pattern {:?}: both p= and t= are required",
                    pattern
                )))
            }
        };
        if tier_duration_ms < period_duration_ms {
            return Err(TierError::Config(format!(
                "tier pattern {:?}: span shorter than one period",
                pattern
            )));
        }
        if tier_duration_ms % period_duration_ms != 0 {
            return Err(TierError::Config(format!(
                "tier pattern {:?}: span is not a whole number of periods",
                pattern
            )));
        }
        Ok(Self {
            period_duration_ms,
            tier_duration_ms,
        })
    }

    /// Number of periods retained.
    pub fn capacity(&self) -> usize {
        (self.tier_duration_ms / self.period_duration_ms) as usize
    }
}

impl FromStr for TierPattern {
    type Err = TierError;

    fn from_str(s: &str) -> Result<Self> {
        TierPattern::parse(s)
    }
}

impl fmt::Display for TierPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p={},t={}",
            format_duration_ms(self.period_duration_ms),
            format_duration_ms(self.tier_duration_ms)
        )
    }
}

/// Parses `<n><unit>` with unit one of `ms`, `s`, `m`, `h`, `d`, `w`. A bare number is seconds.
pub fn parse_duration_ms(s: &str) -> Result<i64> {
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: i64 = digits
        .parse()
        .map_err(|_| TierError::Config(format!("invalid duration {:?}", s)))?;
    let multiplier = match unit {
        "" => MS_PER_SECOND,
        u => UNITS
            .iter()
            .find(|(name, _)| *name == u)
            .map(|(_, ms)| *ms)
            .ok_or_else(|| TierError::Config(format!("unknown duration unit {:?} in {:?}", u, s)))?,
    };
    let ms = n
        .checked_mul(multiplier)
        .ok_or_else(|| TierError::Config(format!("duration {:?} overflows", s)))?;
    if ms <= 0 {
        return Err(TierError::Config(format!("duration {:?} must be positive", s)));
    }
    Ok(ms)
}

/// Formats with the largest unit that divides the duration exactly.
pub fn format_duration_ms(ms: i64) -> String {
    for (name, unit_ms) in UNITS {
        if ms != 0 && ms % unit_ms == 0 {
            return format!("{}{}", ms / unit_ms, name);
        }
    }
    format!("{}ms", ms)
}

/// Configuration for a single tier.
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Tier name; also the file stem of a file-backed tier.
    pub name: String,
    /// Pattern the tier was built from, if any.
    pub pattern: Option<String>,
    pub period_duration_ms: i64,
    /// Number of period slots per metric record.
    pub capacity: usize,
    /// Number of per-record lock stripes.
    pub lock_stripes: usize,
    /// Receives structured events (drops, evictions, corruption).
    pub event_listener: Arc<dyn TierEventListener>,
}

impl TierConfig {
    pub fn new(name: impl Into<String>, period_duration_ms: i64, capacity: usize) -> Self {
        Self {
            name: name.into(),
            pattern: None,
            period_duration_ms,
            capacity,
            lock_stripes: DEFAULT_LOCK_STRIPES,
            event_listener: noop_event_listener(),
        }
    }

    pub fn from_pattern(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let parsed = TierPattern::parse(pattern)?;
        let mut cfg = Self::new(name, parsed.period_duration_ms, parsed.capacity());
        cfg.pattern = Some(pattern.to_string());
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(TierError::Config(format!(
                "tier name {:?} must be non-empty ASCII alphanumerics, '-' or '_'",
                self.name
            )));
        }
        if self.period_duration_ms <= 0 {
            return Err(TierError::Config(format!(
                "tier {}: period duration must be positive",
                self.name
            )));
        }
        if self.capacity == 0 || self.capacity > i32::MAX as usize {
            return Err(TierError::Config(format!(
                "tier {}: capacity {} outside [1, {}]",
                self.name,
                self.capacity,
                i32::MAX
            )));
        }
        if self.lock_stripes == 0 {
            return Err(TierError::Config(format!(
                "tier {}: lock_stripes must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

/// One tier entry in the store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TierSpec {
    pub name: String,
    pub pattern: String,
}

impl TierSpec {
    pub fn new(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

/// Configuration for a chain of file-backed tiers.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding each tier's `.data` and `.index` files.
    pub data_dir: PathBuf,
    pub lock_stripes: usize,
    /// Tiers, finest resolution first.
    pub tiers: Vec<TierSpec>,
    pub event_listener: Arc<dyn TierEventListener>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_stripes: DEFAULT_LOCK_STRIPES,
            tiers: vec![
                TierSpec::new("minute", "p=1m,t=1h"),
                TierSpec::new("hour", "p=1h,t=1d"),
                TierSpec::new("day", "p=1d,t=4w"),
            ],
            event_listener: noop_event_listener(),
        }
    }
}

impl StoreConfig {
    /// Builds the per-tier configurations, finest first.
    pub fn tier_configs(&self) -> Result<Vec<TierConfig>> {
        if self.tiers.is_empty() {
            return Err(TierError::Config("no tiers configured".to_string()));
        }
        let mut out: Vec<TierConfig> = Vec::with_capacity(self.tiers.len());
        for spec in &self.tiers {
            if out.iter().any(|t| t.name == spec.name) {
                return Err(TierError::Config(format!("duplicate tier name {:?}", spec.name)));
            }
            let mut cfg = TierConfig::from_pattern(spec.name.as_str(), &spec.pattern)?;
            cfg.lock_stripes = self.lock_stripes;
            cfg.event_listener = Arc::clone(&self.event_listener);
            cfg.validate()?;
            out.push(cfg);
        }
        Ok(out)
    }
}

/// Store configuration as read from file + env. Every field optional for layering.
#[derive(Debug, Default, Deserialize)]
pub struct StoreFileConfig {
    pub data_dir: Option<String>,
    pub lock_stripes: Option<usize>,
    pub tiers: Option<Vec<TierSpec>>,
}

impl StoreFileConfig {
    /// Merges onto `base`. Only overwrites fields that are `Some`.
    pub fn merge_into(&self, base: &mut StoreConfig) {
        if let Some(d) = &self.data_dir {
            base.data_dir = PathBuf::from(d);
        }
        if let Some(n) = self.lock_stripes {
            base.lock_stripes = n;
        }
        if let Some(t) = &self.tiers {
            base.tiers = t.clone();
        }
    }
}

/// Loads the layered store configuration: defaults, then `file` (or [`DEFAULT_CONFIG_FILE`]
/// if it exists and `file` is `None`), then `TIERSTORE_*` environment variables.
/// `use_file = false` skips every file.
pub fn load_store_config(file: Option<&Path>, use_file: bool) -> Result<StoreConfig> {
    let mut builder = Config::builder();

    if use_file {
        match file {
            Some(path) => {
                if !path.exists() {
                    return Err(TierError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path).required(false));
                }
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("TIERSTORE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder
        .build()
        .map_err(|e| TierError::Config(e.to_string()))?;
    let partial: StoreFileConfig = merged
        .try_deserialize()
        .map_err(|e| TierError::Config(e.to_string()))?;

    let mut cfg = StoreConfig::default();
    partial.merge_into(&mut cfg);
    // Fail at load time rather than at first open.
    cfg.tier_configs()?;
    Ok(cfg)
}
