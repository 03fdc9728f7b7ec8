use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Cooldown,
    Disabled,
}

/// A key as handed over by whoever owns the key list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInput {
    #[serde(alias = "credential", alias = "apiKey")]
    pub key: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default, alias = "configName")]
    pub label: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_source() -> String {
    "manual".to_string()
}

fn default_enabled() -> bool {
    true
}

impl KeyInput {
    pub fn manual(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            source: default_source(),
            label: None,
            enabled: true,
        }
    }
}

/// `AIzaSyAb...wxyz`; short keys are fully masked.
pub fn key_preview(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[derive(Debug, Clone)]
pub(crate) struct KeyRecord {
    pub(crate) index: usize,
    pub(crate) credential: String,
    pub(crate) source: String,
    pub(crate) label: Option<String>,
    pub(crate) status: KeyStatus,
    pub(crate) status_reason: Option<String>,
    pub(crate) consecutive_failures: u32,
    pub(crate) cooldown_until: Option<OffsetDateTime>,
    pub(crate) total_requests: u64,
    pub(crate) total_successes: u64,
    pub(crate) total_failures: u64,
    pub(crate) quota_error_count: u64,
    pub(crate) rate_limit_error_count: u64,
    pub(crate) total_latency: Duration,
    pub(crate) last_used_at: Option<OffsetDateTime>,
    pub(crate) last_success_at: Option<OffsetDateTime>,
    pub(crate) last_error_message: Option<String>,
    pub(crate) last_error_at: Option<OffsetDateTime>,
}

impl KeyRecord {
    pub(crate) fn new(index: usize, input: KeyInput) -> Self {
        Self {
            index,
            credential: input.key.trim().to_string(),
            source: input.source,
            label: input.label,
            status: KeyStatus::Active,
            status_reason: None,
            consecutive_failures: 0,
            cooldown_until: None,
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            quota_error_count: 0,
            rate_limit_error_count: 0,
            total_latency: Duration::ZERO,
            last_used_at: None,
            last_success_at: None,
            last_error_message: None,
            last_error_at: None,
        }
    }

    pub(crate) fn activate(&mut self) {
        self.status = KeyStatus::Active;
        self.status_reason = None;
        self.cooldown_until = None;
        self.consecutive_failures = 0;
    }

    pub(crate) fn cool_down(&mut self, until: OffsetDateTime, reason: String) {
        self.status = KeyStatus::Cooldown;
        self.status_reason = Some(reason);
        self.cooldown_until = Some(until);
    }

    pub(crate) fn disable(&mut self, reason: String) {
        self.status = KeyStatus::Disabled;
        self.status_reason = Some(reason);
        self.cooldown_until = None;
    }

    /// Resolves an elapsed cooldown. Returns true when the key came back.
    pub(crate) fn refresh(&mut self, now: OffsetDateTime) -> bool {
        match (self.status, self.cooldown_until) {
            (KeyStatus::Cooldown, Some(until)) if until <= now => {
                self.activate();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn preview(&self) -> String {
        key_preview(&self.credential)
    }

    pub(crate) fn success_rate(&self) -> f64 {
        success_rate(self.total_successes, self.total_failures)
    }

    pub(crate) fn view(&self) -> KeyView {
        let avg_response_ms = if self.total_successes == 0 {
            None
        } else {
            let nanos = self.total_latency.as_nanos() / u128::from(self.total_successes);
            Some((nanos / 1_000_000) as u64)
        };
        KeyView {
            index: self.index,
            key_preview: self.preview(),
            source: self.source.clone(),
            label: self.label.clone(),
            status: self.status,
            status_reason: self.status_reason.clone(),
            consecutive_failures: self.consecutive_failures,
            cooldown_until: self.cooldown_until,
            total_requests: self.total_requests,
            total_successes: self.total_successes,
            total_failures: self.total_failures,
            quota_error_count: self.quota_error_count,
            rate_limit_error_count: self.rate_limit_error_count,
            success_rate: self.success_rate(),
            avg_response_ms,
            last_used_at: self.last_used_at,
            last_success_at: self.last_success_at,
            last_error: self.last_error_message.clone(),
            last_error_at: self.last_error_at,
        }
    }
}

/// Percentage with one decimal; 100 when nothing has finished yet.
pub(crate) fn success_rate(successes: u64, failures: u64) -> f64 {
    let finished = successes + failures;
    if finished == 0 {
        return 100.0;
    }
    (successes as f64 * 1000.0 / finished as f64).round() / 10.0
}

/// Read-only, credential-free view of one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyView {
    pub index: usize,
    pub key_preview: String,
    pub source: String,
    pub label: Option<String>,
    pub status: KeyStatus,
    pub status_reason: Option<String>,
    pub consecutive_failures: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cooldown_until: Option<OffsetDateTime>,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub quota_error_count: u64,
    pub rate_limit_error_count: u64,
    pub success_rate: f64,
    pub avg_response_ms: Option<u64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_used_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_error_at: Option<OffsetDateTime>,
}
