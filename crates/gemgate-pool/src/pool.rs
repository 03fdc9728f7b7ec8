use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify::{FailureClassifier, FailureKind, RuleClassifier};
use crate::clock::{Clock, SystemClock};
use crate::record::{KeyInput, KeyRecord, KeyStatus, KeyView, key_preview, success_rate};
use crate::reset::next_daily_reset;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Generic failures in a row before a key is cooled down.
    pub failure_threshold: u32,
    pub failure_cooldown: Duration,
    pub rate_limit_cooldown: Duration,
    /// Added after the Pacific-midnight quota reset.
    pub quota_reset_buffer: Duration,
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_cooldown: Duration::from_secs(60),
            rate_limit_cooldown: Duration::from_secs(30),
            quota_reset_buffer: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// A selected key. The index is the handle for reporting the outcome.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyLease {
    pub index: usize,
    pub credential: String,
}

impl KeyLease {
    pub fn preview(&self) -> String {
        key_preview(&self.credential)
    }
}

impl fmt::Debug for KeyLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLease")
            .field("index", &self.index)
            .field("credential", &self.preview())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealth {
    Healthy,
    Degraded,
    Critical,
}

impl PoolHealth {
    fn from_counts(available: usize, total: usize) -> Self {
        if available == 0 {
            PoolHealth::Critical
        } else if available * 2 < total {
            PoolHealth::Degraded
        } else {
            PoolHealth::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub total: usize,
    pub available: usize,
    pub cooldown: usize,
    pub disabled: usize,
    pub health: PoolHealth,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub success_rate: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_recovery_at: Option<OffsetDateTime>,
    pub keys: Vec<KeyView>,
}

#[derive(Debug)]
struct PoolInner {
    records: Vec<KeyRecord>,
    cursor: usize,
}

pub struct KeyPool {
    inner: Mutex<PoolInner>,
    config: PoolConfig,
    classifier: Arc<dyn FailureClassifier>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPool")
            .field("len", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

impl KeyPool {
    /// Disabled and blank inputs are skipped; indexes are assigned afterwards.
    pub fn new(inputs: Vec<KeyInput>, config: PoolConfig) -> Self {
        let records = inputs
            .into_iter()
            .filter(|input| input.enabled && !input.key.trim().is_empty())
            .enumerate()
            .map(|(index, input)| KeyRecord::new(index, input))
            .collect();
        Self {
            inner: Mutex::new(PoolInner { records, cursor: 0 }),
            config,
            classifier: Arc::new(RuleClassifier::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Round-robin over `Active` keys, starting after the last key handed out.
    pub fn next_key(&self) -> Option<KeyLease> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        let len = inner.records.len();
        for offset in 0..len {
            let index = (inner.cursor + offset) % len;
            let record = &mut inner.records[index];
            if record.refresh(now) {
                info!(index, key = %record.preview(), "key cooldown elapsed");
            }
            if record.status != KeyStatus::Active {
                continue;
            }
            record.total_requests += 1;
            record.last_used_at = Some(now);
            let lease = KeyLease {
                index,
                credential: record.credential.clone(),
            };
            inner.cursor = (index + 1) % len;
            return Some(lease);
        }
        None
    }

    /// A specific key regardless of its status.
    pub fn key(&self, index: usize) -> Option<KeyLease> {
        let guard = self.lock();
        let record = guard.records.get(index)?;
        Some(KeyLease {
            index,
            credential: record.credential.clone(),
        })
    }

    /// Stored status, without resolving an elapsed cooldown.
    pub fn status(&self, index: usize) -> Option<KeyStatus> {
        self.lock().records.get(index).map(|record| record.status)
    }

    pub fn view(&self, index: usize) -> Option<KeyView> {
        let now = self.clock.now();
        let mut guard = self.lock();
        let record = guard.records.get_mut(index)?;
        record.refresh(now);
        Some(record.view())
    }

    /// Does not revive a `Disabled` key.
    pub fn report_success(&self, index: usize, elapsed: Duration) {
        let now = self.clock.now();
        let mut guard = self.lock();
        let Some(record) = guard.records.get_mut(index) else {
            return;
        };
        record.total_successes += 1;
        record.total_latency += elapsed;
        record.last_success_at = Some(now);
        if record.status != KeyStatus::Disabled {
            if record.status == KeyStatus::Cooldown {
                info!(index, key = %record.preview(), "key recovered after success");
            }
            record.activate();
        }
    }

    /// Classifies `message` and applies the matching transition. `None` when
    /// `index` is unknown.
    pub fn report_failure(&self, index: usize, message: &str) -> Option<FailureKind> {
        let now = self.clock.now();
        let kind = self.classifier.classify(message);
        let mut guard = self.lock();
        let record = guard.records.get_mut(index)?;

        record.total_failures += 1;
        record.last_error_message = Some(message.to_string());
        record.last_error_at = Some(now);
        match kind {
            FailureKind::QuotaExceeded => record.quota_error_count += 1,
            FailureKind::RateLimited => record.rate_limit_error_count += 1,
            FailureKind::AuthInvalid | FailureKind::Generic => {}
        }
        if record.status == KeyStatus::Disabled {
            return Some(kind);
        }

        match kind {
            FailureKind::QuotaExceeded => {
                let reset = next_daily_reset(now, self.config.quota_reset_buffer);
                // Never earlier than a rate-limit window opened at the same instant.
                let floor = now + self.config.rate_limit_cooldown + Duration::from_secs(1);
                let until = reset.max(floor);
                record.cool_down(until, "daily quota exceeded".to_string());
                warn!(index, key = %record.preview(), until = %until, "key quota exceeded");
            }
            FailureKind::RateLimited => {
                let until = now + self.config.rate_limit_cooldown;
                record.cool_down(until, "rate limited".to_string());
                warn!(index, key = %record.preview(), until = %until, "key rate limited");
            }
            FailureKind::AuthInvalid => {
                record.disable("credential rejected".to_string());
                warn!(index, key = %record.preview(), error = %message, "key disabled");
            }
            FailureKind::Generic => {
                record.consecutive_failures += 1;
                if record.consecutive_failures >= self.config.failure_threshold {
                    let until = now + self.config.failure_cooldown;
                    let reason = format!("{} consecutive failures", record.consecutive_failures);
                    record.cool_down(until, reason);
                    warn!(
                        index,
                        key = %record.preview(),
                        failures = record.consecutive_failures,
                        until = %until,
                        "key cooling down after repeated failures"
                    );
                } else {
                    debug!(
                        index,
                        failures = record.consecutive_failures,
                        error = %message,
                        "key failure recorded"
                    );
                }
            }
        }
        Some(kind)
    }

    /// Back to `Active` with failure state and error fields cleared; lifetime
    /// counters are kept.
    pub fn reset_key(&self, index: usize) -> bool {
        let mut guard = self.lock();
        let Some(record) = guard.records.get_mut(index) else {
            return false;
        };
        reset_record(record);
        info!(index, key = %record.preview(), "key reset");
        true
    }

    pub fn reset_all(&self) -> usize {
        let mut guard = self.lock();
        guard.records.iter_mut().for_each(reset_record);
        let count = guard.records.len();
        info!(count, "all keys reset");
        count
    }

    /// Flips every elapsed cooldown back to `Active`; returns how many.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut guard = self.lock();
        let mut recovered = 0;
        for record in guard.records.iter_mut() {
            if record.refresh(now) {
                info!(index = record.index, key = %record.preview(), "key cooldown elapsed");
                recovered += 1;
            }
        }
        recovered
    }

    pub fn available_count(&self) -> usize {
        let now = self.clock.now();
        let mut guard = self.lock();
        let mut available = 0;
        for record in guard.records.iter_mut() {
            record.refresh(now);
            if record.status == KeyStatus::Active {
                available += 1;
            }
        }
        available
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let now = self.clock.now();
        let mut guard = self.lock();
        guard.records.iter_mut().for_each(|record| {
            record.refresh(now);
        });

        let records = &guard.records;
        let count = |status: KeyStatus| records.iter().filter(|r| r.status == status).count();
        let total = records.len();
        let available = count(KeyStatus::Active);
        let total_successes = records.iter().map(|r| r.total_successes).sum();
        let total_failures = records.iter().map(|r| r.total_failures).sum();

        PoolSnapshot {
            total,
            available,
            cooldown: count(KeyStatus::Cooldown),
            disabled: count(KeyStatus::Disabled),
            health: PoolHealth::from_counts(available, total),
            total_requests: records.iter().map(|r| r.total_requests).sum(),
            total_successes,
            total_failures,
            success_rate: success_rate(total_successes, total_failures),
            next_recovery_at: records.iter().filter_map(|r| r.cooldown_until).min(),
            keys: records.iter().map(KeyRecord::view).collect(),
        }
    }

    /// Starts the periodic recovery task. It holds only a weak reference, so
    /// it ends on its own once the pool is dropped, and it is aborted when the
    /// returned handle is dropped.
    pub fn spawn_recovery_sweep(self: &Arc<Self>) -> RecoverySweep {
        let pool: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let recovered = pool.sweep();
                if recovered > 0 {
                    debug!(recovered, "recovery sweep");
                }
            }
        });
        RecoverySweep { handle }
    }
}

fn reset_record(record: &mut KeyRecord) {
    record.activate();
    record.last_error_message = None;
    record.last_error_at = None;
}

#[derive(Debug)]
pub struct RecoverySweep {
    handle: JoinHandle<()>,
}

impl RecoverySweep {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RecoverySweep {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
