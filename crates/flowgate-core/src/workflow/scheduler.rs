//! Cron trigger table with a single tick loop.
//!
//! Provides:
//! - Cron expression parsing (5-field, or 6-field with seconds)
//! - Human-readable schedule normalization ("every 5 minutes" -> cron)
//! - One entry per scheduled workflow with a precomputed next fire time
//! - A ticking loop that fires due entries at most once per tick and
//!   recomputes the next fire time from "now" (missed ticks are not replayed)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The expression parses but never fires.
    #[error("schedule '{0}' has no upcoming occurrence")]
    NoOccurrence(String),

    #[error("workflow '{0}' is not scheduled")]
    NotScheduled(String),
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 6-field cron expression.
///
/// Supported patterns (case-insensitive):
/// - "every N seconds"     -> "*/N * * * * *"
/// - "every N minutes"     -> "0 */N * * * *"
/// - "every N hours"       -> "0 0 */N * * *"
/// - "every minute"        -> "0 * * * * *"
/// - "every hour"          -> "0 0 * * * *"
/// - "every day"           -> "0 0 0 * * *"
/// - "every day at HH:MM"  -> "0 MM HH * * *"
/// - "hourly" / "daily"
///
/// A 5-field cron expression gets a leading "0" seconds field; a 6-field
/// one is returned unchanged.
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();
    let invalid = || SchedulerError::InvalidSchedule(input.to_string());

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    match parts.len() {
        5 => return Ok(format!("0 {}", parts.join(" "))),
        6 => return Ok(parts.join(" ")),
        _ => {}
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    let Some(rest) = lower.strip_prefix("every ") else {
        return Err(invalid());
    };

    if let Some(at) = rest.strip_prefix("day at ") {
        let (hour, minute) = at.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
        if hour < 24 && minute < 60 {
            return Ok(format!("0 {minute} {hour} * * *"));
        }
        return Err(invalid());
    }

    let words: Vec<&str> = rest.split_whitespace().collect();
    let [n, unit] = words.as_slice() else {
        return Err(invalid());
    };
    let n: u32 = n.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(SchedulerError::InvalidSchedule(
            "interval must be > 0".to_string(),
        ));
    }
    match unit.trim_end_matches('s') {
        "second" => Ok(format!("*/{n} * * * * *")),
        "minute" => Ok(format!("0 */{n} * * * *")),
        "hour" => Ok(format!("0 0 */{n} * * *")),
        _ => Err(invalid()),
    }
}

/// Parse a schedule into a `croner` pattern.
pub fn parse_schedule(schedule: &str) -> Result<croner::Cron, SchedulerError> {
    let expr = normalize_schedule(schedule)?;
    expr.parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidSchedule(format!("{schedule}: {e}")))
}

/// First occurrence strictly after `after`.
fn next_after(cron: &croner::Cron, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron.iter_after(after).next()
}

// ---------------------------------------------------------------------------
// CronTable
// ---------------------------------------------------------------------------

/// Callback invoked when a workflow's schedule fires.
pub type CronCallback = Arc<dyn Fn(String, DateTime<Utc>) -> BoxFuture<'static, ()> + Send + Sync>;

struct CronEntry {
    expression: String,
    cron: croner::Cron,
    next_fire: DateTime<Utc>,
    callback: CronCallback,
}

/// Scheduled workflows keyed by workflow id.
#[derive(Default)]
pub struct CronTable {
    entries: Mutex<HashMap<String, CronEntry>>,
}

impl CronTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the entry for `workflow_id`. Returns its first fire time.
    pub fn schedule(
        &self,
        workflow_id: impl Into<String>,
        schedule: &str,
        callback: CronCallback,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        self.schedule_from(workflow_id, schedule, callback, Utc::now())
    }

    fn schedule_from(
        &self,
        workflow_id: impl Into<String>,
        schedule: &str,
        callback: CronCallback,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let workflow_id = workflow_id.into();
        let cron = parse_schedule(schedule)?;
        let next_fire =
            next_after(&cron, now).ok_or_else(|| SchedulerError::NoOccurrence(schedule.to_string()))?;
        let expression = normalize_schedule(schedule)?;

        tracing::info!(workflow = %workflow_id, cron = %expression, %next_fire, "workflow scheduled");
        self.lock().insert(
            workflow_id,
            CronEntry {
                expression,
                cron,
                next_fire,
                callback,
            },
        );
        Ok(next_fire)
    }

    pub fn unschedule(&self, workflow_id: &str) -> Result<(), SchedulerError> {
        self.lock()
            .remove(workflow_id)
            .map(|_| tracing::info!(workflow = %workflow_id, "workflow unscheduled"))
            .ok_or_else(|| SchedulerError::NotScheduled(workflow_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn next_fire(&self, workflow_id: &str) -> Option<DateTime<Utc>> {
        self.lock().get(workflow_id).map(|e| e.next_fire)
    }

    pub fn expression(&self, workflow_id: &str) -> Option<String> {
        self.lock().get(workflow_id).map(|e| e.expression.clone())
    }

    /// Entries due at `now`, each advanced to its next occurrence after `now`.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<(String, CronCallback)> {
        let mut entries = self.lock();
        let mut due = Vec::new();
        for (id, entry) in entries.iter_mut() {
            if entry.next_fire > now {
                continue;
            }
            due.push((id.clone(), Arc::clone(&entry.callback)));
            match next_after(&entry.cron, now) {
                Some(next) => entry.next_fire = next,
                None => {
                    tracing::warn!(workflow = %id, "schedule exhausted");
                    entry.next_fire = DateTime::<Utc>::MAX_UTC;
                }
            }
        }
        due
    }

    /// Fire every due entry on its own task. Returns how many fired.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        let due = self.take_due(now);
        for (id, callback) in &due {
            tracing::info!(workflow = %id, %now, "cron trigger fired");
            tokio::spawn(callback(id.clone(), now));
        }
        due.len()
    }

    /// Tick every `interval` until `cancel` fires.
    pub fn spawn_tick_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(entries = self.len(), ?interval, "cron loop started");
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick(Utc::now());
                    }
                }
            }
            tracing::info!("cron loop stopped");
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CronEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
