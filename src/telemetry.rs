use std::sync::Arc;

#[cfg(feature = "prometheus")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "prometheus")]
use std::sync::Mutex;
#[cfg(feature = "prometheus")]
use std::thread::JoinHandle;
use std::time::Duration;

use crate::types::{MetricIndex, TimestampMs};

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not acceptable for
/// production. Instead, callers can provide an implementation that forwards these events to
/// `tracing`, `log`, metrics, or custom sinks.
pub trait TierEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: TierEvent);
}

/// Structured events emitted by tiers and chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierEvent {
    TierOpened {
        tier: String,
        records: u64,
        start_period: Option<TimestampMs>,
        end_period: Option<TimestampMs>,
    },
    MetricCreated {
        tier: String,
        index: MetricIndex,
    },

    /// A sample arrived for a period older than the record's current one.
    SampleDropped {
        tier: String,
        index: MetricIndex,
        period: TimestampMs,
        current_period: TimestampMs,
    },
    PeriodEvicted {
        tier: String,
        index: MetricIndex,
        period_start: TimestampMs,
    },

    /// A record failed its structural checks; it was not written.
    RecordCorrupted {
        tier: String,
        index: MetricIndex,
        details: String,
    },
    /// Flushing a tier's log to durable storage failed.
    SyncFailed {
        tier: String,
        error: String,
    },
    /// Forwarding an evicted period into the next tier failed.
    CascadeFailed {
        from_tier: String,
        to_tier: String,
        index: MetricIndex,
        error: String,
    },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl TierEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: TierEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn TierEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation through the `metrics` facade.
///
/// Emitting is effectively free until a recorder is installed. With the `prometheus`
/// feature, [`tier_metrics::InProcessPrometheus`] installs one and renders the exposition
/// text in-process.
pub mod tier_metrics {
    use super::*;

    use ::metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

    // --- metric names ---
    //
    // Counters are exposed as `<name>_total` by the Prometheus exporter.

    pub const SAMPLES: &str = "tierstore_samples";
    pub const PERIODS_EVICTED: &str = "tierstore_periods_evicted";
    pub const ADD_VALUE_DURATION_SECONDS: &str = "tierstore_add_value_duration_seconds";
    pub const RECORDS: &str = "tierstore_records";

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
        stop: Arc<AtomicBool>,
        upkeep_thread: Mutex<Option<JoinHandle<()>>>,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process) and starts a small upkeep thread.
        pub fn install(upkeep_interval: Duration) -> Result<Self, MetricsInitError> {
            describe_all();

            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = stop.clone();
            let handle_clone = handle.clone();
            let upkeep_thread = std::thread::Builder::new()
                .name("tierstore-metrics-upkeep".to_string())
                .spawn(move || {
                    while !stop_clone.load(Ordering::Relaxed) {
                        std::thread::sleep(upkeep_interval);
                        handle_clone.run_upkeep();
                    }
                })
                .map_err(|e| MetricsInitError::ThreadSpawn(e.to_string()))?;

            Ok(Self {
                handle,
                stop,
                upkeep_thread: Mutex::new(Some(upkeep_thread)),
            })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    impl Drop for InProcessPrometheus {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Ok(mut guard) = self.upkeep_thread.lock() {
                if let Some(t) = guard.take() {
                    let _ = t.join();
                }
            }
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
        #[error("failed to spawn upkeep thread: {0}")]
        ThreadSpawn(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    /// Counts one sample offered to `tier`, labelled with its window outcome.
    #[inline]
    pub fn record_sample(tier: &str, outcome: &'static str, duration: Duration) {
        ::metrics::counter!(SAMPLES, "tier" => tier.to_string(), "outcome" => outcome)
            .increment(1);
        ::metrics::histogram!(ADD_VALUE_DURATION_SECONDS, "tier" => tier.to_string())
            .record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_eviction(tier: &str) {
        ::metrics::counter!(PERIODS_EVICTED, "tier" => tier.to_string()).increment(1);
    }

    #[inline]
    pub fn record_size(tier: &str, records: u64) {
        ::metrics::gauge!(RECORDS, "tier" => tier.to_string()).set(records as f64);
    }

    pub fn describe_all() {
        describe_counter!(
            SAMPLES,
            Unit::Count,
            "Samples offered to a tier, labelled by tier and window outcome."
        );
        describe_counter!(
            PERIODS_EVICTED,
            Unit::Count,
            "Periods evicted from a full record when a new period opened."
        );
        describe_histogram!(
            ADD_VALUE_DURATION_SECONDS,
            Unit::Seconds,
            "Time spent applying one sample to a tier record, lock wait included."
        );
        describe_gauge!(RECORDS, Unit::Count, "Number of metric records in a tier.");
    }
}
