//! Cron timers
//!
//! One recurring timer per [`TimerTarget`], each driven by its own tokio
//! task. A timer moves `Stopped -> Scheduled -> Fired -> Scheduled` until it
//! is cancelled; firing never stops it.
//!
//! Expressions use the Quartz layout `sec min hour day-of-month month
//! day-of-week [year]` with `?` meaning "any" and weekdays numbered `1`
//! (Sunday) to `7`. Classic five-field expressions are accepted with an
//! implied second of `0` and keep their own weekday numbering, `0` or `7`
//! for Sunday.

use crate::clock::Clock;
use crate::error::{Result, TrustError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// Cron expressions
// =============================================================================

#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidCronExpression`] for a wrong field count or
    /// a field the `cron` parser rejects.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => match fields.as_slice() {
                [minute, hour, day, month, weekday] => {
                    let weekday =
                        classic_day_of_week(weekday).map_err(|reason| TrustError::invalid_cron(expression, reason))?;
                    format!("0 {minute} {hour} {day} {month} {weekday}")
                }
                _ => fields.join(" "),
            },
            6 | 7 => fields.join(" "),
            count => {
                return Err(TrustError::invalid_cron(
                    expression,
                    format!("expected 5, 6 or 7 fields, found {count}"),
                ))
            }
        }
        .replace('?', "*");

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| TrustError::invalid_cron(expression, e))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&after).take(count).collect()
    }
}

/// Renumber a classic day-of-week field (`0`-`7`, Sunday at both ends) to
/// the Quartz `1`-`7` the `cron` crate expects
///
/// Names, `*` and steps pass through; only numeric days move.
fn classic_day_of_week(field: &str) -> std::result::Result<String, String> {
    let mut items = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        let shifted = match base.split_once('-') {
            Some((first, last)) => match (parse_weekday(first)?, parse_weekday(last)?) {
                (Some(0), Some(7)) => "1-7".to_string(),
                (Some(6), Some(7)) if step.is_none() => "7,1".to_string(),
                (Some(first), Some(7)) if step.is_none() => format!("{}-7,1", first.saturating_add(1)),
                (Some(_), Some(7)) => return Err(format!("weekday range {base} with a step wraps past Saturday")),
                (Some(first), Some(last)) => format!("{}-{}", first.saturating_add(1), last.saturating_add(1)),
                _ => base.to_string(),
            },
            None => match parse_weekday(base)? {
                Some(day) => (day % 7).saturating_add(1).to_string(),
                None => base.to_string(),
            },
        };
        items.push(match step {
            Some(step) => format!("{shifted}/{step}"),
            None => shifted,
        });
    }
    Ok(items.join(","))
}

/// `None` for anything that is not a plain number
fn parse_weekday(token: &str) -> std::result::Result<Option<u8>, String> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    match token.parse::<u8>() {
        Ok(day) if day <= 7 => Ok(Some(day)),
        _ => Err(format!("day of week {token} is out of range 0-7")),
    }
}

/// Next fire time of `expression` strictly after `after`
///
/// # Errors
///
/// Returns [`TrustError::InvalidCronExpression`] for an unparsable expression.
pub fn next_fire_after(expression: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    Ok(CronSchedule::parse(expression)?.next_after(after))
}

// =============================================================================
// Timers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerTarget {
    /// CRL refresh of the named trust point
    TrustPoint(String),
    ClockDrift,
}

impl fmt::Display for TimerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerTarget::TrustPoint(name) => write!(f, "trust point {name}"),
            TimerTarget::ClockDrift => f.write_str("clock drift"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Scheduled { next_fire: DateTime<Utc> },
    Fired { at: DateTime<Utc> },
    Cancelled,
}

impl TimerState {
    pub fn is_active(&self) -> bool {
        matches!(self, TimerState::Scheduled { .. } | TimerState::Fired { .. })
    }
}

/// What a timer does when it fires
#[async_trait]
pub trait TimerAction: Send + Sync {
    async fn fire(&self, target: &TimerTarget);

    /// Called after every (re)schedule with the upcoming fire date
    async fn scheduled(&self, _target: &TimerTarget, _next_fire: Option<DateTime<Utc>>) {}
}

struct TimerEntry {
    schedule: CronSchedule,
    state: TimerState,
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

type TimerTable = Arc<Mutex<HashMap<TimerTarget, TimerEntry>>>;

pub struct Scheduler {
    action: Arc<dyn TimerAction>,
    clock: Arc<dyn Clock>,
    timers: TimerTable,
    generation: AtomicU64,
}

impl Scheduler {
    pub fn new(action: Arc<dyn TimerAction>, clock: Arc<dyn Clock>) -> Self {
        Self {
            action,
            clock,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Start or replace the timer for `target`
    ///
    /// The expression is validated first; on error no timer is created and
    /// any existing timer for the target keeps running. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidCronExpression`] for an unparsable expression.
    pub fn start_timer(
        &self,
        target: TimerTarget,
        cron: &str,
        run_immediately: bool,
    ) -> Result<Option<DateTime<Utc>>> {
        let schedule = CronSchedule::parse(cron)?;
        let next_fire = schedule.next_after(self.clock.now());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let mut timers = self.timers.lock();
        if let Some(previous) = timers.remove(&target) {
            if let Some(handle) = previous.handle {
                handle.abort();
            }
            debug!("Replacing timer for {}", target);
        }

        let task = TimerTask {
            target: target.clone(),
            schedule: schedule.clone(),
            generation,
            timers: Arc::clone(&self.timers),
            action: Arc::clone(&self.action),
            clock: Arc::clone(&self.clock),
        };
        timers.insert(
            target.clone(),
            TimerEntry {
                schedule,
                state: TimerState::Stopped,
                handle: Some(tokio::spawn(task.run(run_immediately))),
                generation,
            },
        );

        info!(
            "Timer started for {} with '{}', next fire {}",
            target,
            cron,
            next_fire.map_or_else(|| "never".to_string(), |d| d.to_rfc3339())
        );
        Ok(next_fire)
    }

    /// Stop the timer for `target`; returns `false` if none was active
    pub fn cancel_timer(&self, target: &TimerTarget) -> bool {
        let mut timers = self.timers.lock();
        let Some(entry) = timers.get_mut(target) else {
            return false;
        };
        if entry.state == TimerState::Cancelled {
            return false;
        }
        if let Some(handle) = entry.handle.take() {
            handle.abort();
        }
        entry.state = TimerState::Cancelled;
        info!("Timer cancelled for {}", target);
        true
    }

    pub fn timer_state(&self, target: &TimerTarget) -> Option<TimerState> {
        self.timers.lock().get(target).map(|entry| entry.state)
    }

    pub fn cron_expression(&self, target: &TimerTarget) -> Option<String> {
        self.timers
            .lock()
            .get(target)
            .map(|entry| entry.schedule.expression().to_string())
    }

    pub fn next_fire(&self, target: &TimerTarget) -> Option<DateTime<Utc>> {
        match self.timer_state(target)? {
            TimerState::Scheduled { next_fire } => Some(next_fire),
            _ => None,
        }
    }

    pub fn active_timers(&self) -> usize {
        self.timers
            .lock()
            .values()
            .filter(|entry| entry.state.is_active() || entry.state == TimerState::Stopped)
            .filter(|entry| entry.handle.is_some())
            .count()
    }

    /// Cancel every timer
    pub fn shutdown(&self) {
        let mut timers = self.timers.lock();
        for entry in timers.values_mut() {
            if let Some(handle) = entry.handle.take() {
                handle.abort();
            }
            entry.state = TimerState::Cancelled;
        }
        info!("Scheduler shut down, {} timers cancelled", timers.len());
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.timers.lock().values_mut() {
            if let Some(handle) = entry.handle.take() {
                handle.abort();
            }
        }
    }
}

struct TimerTask {
    target: TimerTarget,
    schedule: CronSchedule,
    generation: u64,
    timers: TimerTable,
    action: Arc<dyn TimerAction>,
    clock: Arc<dyn Clock>,
}

impl TimerTask {
    /// Returns `false` once the timer was replaced or cancelled
    fn transition(&self, state: TimerState) -> bool {
        let mut timers = self.timers.lock();
        match timers.get_mut(&self.target) {
            Some(entry) if entry.generation == self.generation && entry.state != TimerState::Cancelled => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }

    async fn fire(&self) -> bool {
        if !self.transition(TimerState::Fired { at: self.clock.now() }) {
            return false;
        }
        debug!("Timer fired for {}", self.target);
        self.action.fire(&self.target).await;
        true
    }

    async fn run(self, run_immediately: bool) {
        if run_immediately && !self.fire().await {
            return;
        }

        let mut last_fire: Option<DateTime<Utc>> = None;
        loop {
            let now = self.clock.now();
            let after = last_fire.map_or(now, |last| last.max(now));
            let Some(next_fire) = self.schedule.next_after(after) else {
                warn!("No upcoming fire time for {}, timer stopped", self.target);
                if self.transition(TimerState::Stopped) {
                    self.action.scheduled(&self.target, None).await;
                }
                return;
            };

            if !self.transition(TimerState::Scheduled { next_fire }) {
                return;
            }
            self.action.scheduled(&self.target, Some(next_fire)).await;

            let wait = next_fire
                .signed_duration_since(now)
                .to_std()
                .unwrap_or_default();
            tokio::time::sleep(wait).await;

            last_fire = Some(next_fire);
            if !self.fire().await {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    struct RecordingAction {
        fired: mpsc::UnboundedSender<TimerTarget>,
        scheduled: mpsc::UnboundedSender<Option<DateTime<Utc>>>,
    }

    #[async_trait]
    impl TimerAction for RecordingAction {
        async fn fire(&self, target: &TimerTarget) {
            let _ = self.fired.send(target.clone());
        }

        async fn scheduled(&self, _target: &TimerTarget, next_fire: Option<DateTime<Utc>>) {
            let _ = self.scheduled.send(next_fire);
        }
    }

    fn scheduler() -> (
        Scheduler,
        mpsc::UnboundedReceiver<TimerTarget>,
        mpsc::UnboundedReceiver<Option<DateTime<Utc>>>,
    ) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let (scheduled_tx, scheduled_rx) = mpsc::unbounded_channel();
        let action = RecordingAction {
            fired: fired_tx,
            scheduled: scheduled_tx,
        };
        (
            Scheduler::new(Arc::new(action), Arc::new(SystemClock)),
            fired_rx,
            scheduled_rx,
        )
    }

    #[test]
    fn test_quartz_expression_next_fire_is_deterministic() {
        let after = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let next = next_fire_after("0 0 3 * * ?", after).unwrap();
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2024, 5, 11, 3, 0, 0).unwrap()));
        assert_eq!(next_fire_after("0 0 3 * * ?", after).unwrap(), next);
    }

    #[test]
    fn test_five_field_expression_implies_zero_seconds() {
        let schedule = CronSchedule::parse("30 2 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        assert_eq!(
            schedule.upcoming(after, 2),
            vec![
                Utc.with_ymd_and_hms(2024, 5, 11, 2, 30, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 5, 12, 2, 30, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_five_field_weekdays_count_from_sunday_zero() {
        // Wednesday
        let after = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        let sunday = Some(Utc.with_ymd_and_hms(2024, 1, 7, 3, 0, 0).unwrap());
        let monday = Some(Utc.with_ymd_and_hms(2024, 1, 8, 3, 0, 0).unwrap());

        assert_eq!(next_fire_after("0 3 * * 0", after).unwrap(), sunday);
        assert_eq!(next_fire_after("0 3 * * 7", after).unwrap(), sunday);
        assert_eq!(next_fire_after("0 3 * * 1", after).unwrap(), monday);
        assert_eq!(next_fire_after("0 3 * * mon", after).unwrap(), monday);
        let saturday = Some(Utc.with_ymd_and_hms(2024, 1, 6, 3, 0, 0).unwrap());
        assert_eq!(next_fire_after("0 3 * * 6-7", after).unwrap(), saturday);

        let weekdays = CronSchedule::parse("0 3 * * 1-5").unwrap().upcoming(after, 4);
        assert_eq!(
            weekdays,
            vec![
                Utc.with_ymd_and_hms(2024, 1, 4, 3, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 5, 3, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 8, 3, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 9, 3, 0, 0).unwrap(),
            ]
        );

        // six fields keep the Quartz numbering
        assert_eq!(next_fire_after("0 0 3 ? * 1", after).unwrap(), sunday);
        assert!(CronSchedule::parse("0 3 * * 8").is_err());
    }

    #[test]
    fn test_invalid_expressions() {
        for expression in ["* * * *", "", "0 0 25 * * ?", "not a cron expression at all"] {
            let error = CronSchedule::parse(expression).unwrap_err();
            assert!(
                matches!(error, TrustError::InvalidCronExpression { .. }),
                "{expression} gave {error:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_invalid_cron_creates_no_timer() {
        let (scheduler, _fired, _scheduled) = scheduler();
        let target = TimerTarget::TrustPoint("CN=RootCA".to_string());

        let result = scheduler.start_timer(target.clone(), "* * * *", true);
        assert!(matches!(result, Err(TrustError::InvalidCronExpression { .. })));
        assert_eq!(scheduler.timer_state(&target), None);
        assert_eq!(scheduler.active_timers(), 0);
    }

    #[tokio::test]
    async fn test_run_immediately_fires_then_schedules() {
        let (scheduler, mut fired, mut scheduled) = scheduler();
        let target = TimerTarget::TrustPoint("CN=RootCA".to_string());

        let next = scheduler.start_timer(target.clone(), "0 0 3 * * ?", true).unwrap();
        assert!(next.is_some());

        assert_eq!(fired.recv().await, Some(target.clone()));
        let reported = scheduled.recv().await.unwrap();
        assert_eq!(reported, next);
        assert_eq!(scheduler.next_fire(&target), next);
        assert_eq!(scheduler.cron_expression(&target).as_deref(), Some("0 0 3 * * ?"));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (scheduler, _fired, mut scheduled) = scheduler();
        let target = TimerTarget::ClockDrift;

        scheduler.start_timer(target.clone(), "0 0/5 * * * ?", false).unwrap();
        scheduled.recv().await.unwrap();

        assert!(scheduler.cancel_timer(&target));
        assert!(!scheduler.cancel_timer(&target));
        assert_eq!(scheduler.timer_state(&target), Some(TimerState::Cancelled));
        assert!(!scheduler.cancel_timer(&TimerTarget::TrustPoint("CN=Other".to_string())));
    }

    #[tokio::test]
    async fn test_restart_replaces_timer() {
        let (scheduler, _fired, mut scheduled) = scheduler();
        let target = TimerTarget::TrustPoint("CN=RootCA".to_string());

        scheduler.start_timer(target.clone(), "0 0 3 * * ?", false).unwrap();
        scheduled.recv().await.unwrap();
        scheduler.start_timer(target.clone(), "0 30 4 * * ?", false).unwrap();
        scheduled.recv().await.unwrap();

        assert_eq!(scheduler.active_timers(), 1);
        assert_eq!(scheduler.cron_expression(&target).as_deref(), Some("0 30 4 * * ?"));

        scheduler.shutdown();
        assert_eq!(scheduler.timer_state(&target), Some(TimerState::Cancelled));
        assert_eq!(scheduler.active_timers(), 0);
    }
}
