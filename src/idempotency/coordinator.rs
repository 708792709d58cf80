use crate::config::IdempotencySettings;
use crate::error::{AppError, Result, StoreError};
use crate::idempotency::record::{IdempotencyRecord, IdempotencyState, RETENTION_SECONDS};
use crate::idempotency::storage::IdempotencyStore;
use crate::pipeline::context::Cancellation;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Tuning for the coordinator's claim-and-wait behaviour.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Delay between polls while another invocation holds the key.
    pub poll_interval: Duration,
    /// Bounded number of polls before giving up on a terminal state.
    pub max_poll_attempts: u32,
    /// Store-level record retention window.
    pub retention: Duration,
    /// Timeout for the connectivity check at construction.
    pub connect_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            max_poll_attempts: 5,
            retention: Duration::from_secs(RETENTION_SECONDS),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl CoordinatorConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(AppError::Configuration("poll_interval must be non-zero".into()));
        }
        if self.max_poll_attempts == 0 {
            return Err(AppError::Configuration("max_poll_attempts must be non-zero".into()));
        }
        if self.retention.is_zero() {
            return Err(AppError::Configuration("retention must be non-zero".into()));
        }
        Ok(())
    }
}

impl From<&IdempotencySettings> for CoordinatorConfig {
    fn from(settings: &IdempotencySettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            max_poll_attempts: settings.max_poll_attempts,
            retention: Duration::from_secs(settings.retention_seconds),
            connect_timeout: Duration::from_secs(settings.connect_timeout_seconds),
        }
    }
}

/// Result of a coordinator check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// No prior record; the caller now holds the in-progress claim.
    New,
    /// The unit of work already completed; stored response bytes.
    Completed(Vec<u8>),
    /// The unit of work already failed; stored failure text.
    Failed(String),
}

/// Counters for coordinator activity.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub total_checks: AtomicU64,
    pub duplicates: AtomicU64,
    pub new_keys: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_check(&self) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_new(&self) {
        self.new_keys.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            new_keys: self.new_keys.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_checks: u64,
    pub duplicates: u64,
    pub new_keys: u64,
    pub completed: u64,
    pub failed: u64,
}

impl MetricsSnapshot {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.total_checks as f64
        }
    }
}

/// Coordinates at-most-once processing of logical units of work.
///
/// The atomic claim in [`Coordinator::check`] is what gives the
/// at-most-one-winner guarantee under concurrent or redelivered
/// invocations; the bounded poll and the retention window are
/// bookkeeping around it.
pub struct Coordinator {
    store: Arc<dyn IdempotencyStore>,
    config: CoordinatorConfig,
    metrics: Arc<CoordinatorMetrics>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Validates the config and pings the store before handing out the
    /// coordinator. Store unavailability surfaces immediately.
    pub async fn connect(
        store: Arc<dyn IdempotencyStore>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        config.validate()?;

        let coordinator = Self {
            store,
            config,
            metrics: Arc::new(CoordinatorMetrics::new()),
        };
        coordinator.ping().await?;

        Ok(coordinator)
    }

    pub fn metrics(&self) -> Arc<CoordinatorMetrics> {
        Arc::clone(&self.metrics)
    }

    async fn ping(&self) -> Result<()> {
        tokio::time::timeout(self.config.connect_timeout, self.store.ping())
            .await
            .map_err(|_| {
                AppError::Store(StoreError::Unavailable(format!(
                    "store ping timed out after {:?}",
                    self.config.connect_timeout
                )))
            })?
    }

    /// Claims `key` or reports what a previous holder did with it.
    ///
    /// If no record exists one is created in `InProgress` state and
    /// [`CheckOutcome::New`] is returned; losing the insert race is
    /// treated as "already exists". An existing in-progress record is
    /// polled until a terminal state appears, the attempt budget runs
    /// out, or `cancel` fires.
    pub async fn check(&self, cancel: &Cancellation, key: &str) -> Result<CheckOutcome> {
        self.metrics.record_check();

        let claim = IdempotencyRecord::in_progress(key, self.config.retention);
        let existing = self.store.try_acquire(&claim).await.map_err(|err| {
            error!(key, error = %err, "idempotency claim failed");
            err
        })?;

        let Some(record) = existing else {
            debug!(key, "claimed idempotency key");
            self.metrics.record_new();
            return Ok(CheckOutcome::New);
        };

        self.metrics.record_duplicate();

        let record = if record.state == IdempotencyState::InProgress {
            self.wait_for_terminal(cancel, key).await?
        } else {
            record
        };

        match record.state {
            IdempotencyState::Error => Ok(CheckOutcome::Failed(
                record.error_message.unwrap_or_default(),
            )),
            _ => Ok(CheckOutcome::Completed(record.response.unwrap_or_default())),
        }
    }

    /// Polls for a terminal state while another invocation holds the key.
    /// Exhaustion is authoritative only after the final poll completes.
    async fn wait_for_terminal(
        &self,
        cancel: &Cancellation,
        key: &str,
    ) -> Result<IdempotencyRecord> {
        for attempt in 1..=self.config.max_poll_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key, attempt, "cancelled while waiting for terminal state");
                    return Err(AppError::Cancelled);
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let record = self.store.find(key).await?.ok_or_else(|| {
                AppError::NotFound(format!("record for key {key} disappeared while waiting"))
            })?;

            if record.is_terminal() {
                debug!(key, attempt, "observed terminal state while waiting");
                return Ok(record);
            }
        }

        Err(AppError::MaxAttemptsExceeded)
    }

    /// Transitions the in-progress record for `key` to `Complete`.
    pub async fn mark_complete(&self, key: &str, response: Option<Vec<u8>>) -> Result<()> {
        let matched = self.store.mark_complete(key, response).await?;
        if !matched {
            return Err(AppError::NotFound(format!(
                "no in-progress record for key {key}"
            )));
        }

        self.metrics.record_completed();
        Ok(())
    }

    /// Transitions the in-progress record for `key` to `Error`.
    pub async fn mark_error(&self, key: &str, message: &str) -> Result<()> {
        let matched = self.store.mark_error(key, message).await?;
        if !matched {
            return Err(AppError::NotFound(format!(
                "no in-progress record for key {key}"
            )));
        }

        self.metrics.record_failed();
        Ok(())
    }
}
