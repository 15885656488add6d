//! Reminder Scheduler: adapted from the teacher's cron-routine
//! scheduler to the spec's simpler `Reminder{id, message, trigger_time,
//! repeat, command, triggered}` model. Keeps the teacher's background-
//! tick / bounded-concurrency / retry-with-backoff shape; the
//! routine-specific cron-expression-per-routine model is replaced by
//! the `RepeatKind` enum, while the `cron` crate still backs
//! hourly/daily/weekly next-occurrence computation. The teacher's
//! passive pattern-analysis loop is superseded by
//! `memory::queue::maintenance_tick` and is not carried forward.

use crate::orchestrator::{Orchestrator, OrchestratorDeps};
use crate::schema::{ExecutionContext, InternalEvent, RepeatKind, Reminder, StopSignal};
use crate::server;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

pub struct ReminderStore {
    path: PathBuf,
    reminders: StdMutex<Vec<Reminder>>,
}

impl ReminderStore {
    pub fn load(config_dir: &PathBuf) -> Result<Self> {
        let path = config_dir.join("reminders.json");
        let reminders = if path.exists() {
            let content = std::fs::read_to_string(&path).context("failed to read reminders.json")?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(ReminderStore { path, reminders: StdMutex::new(reminders) })
    }

    pub fn list(&self) -> Vec<Reminder> {
        self.reminders.lock().expect("reminder store lock poisoned").clone()
    }

    pub fn create(&self, message: String, trigger_time: String, repeat: RepeatKind, command: Option<String>) -> Result<Reminder> {
        let mut reminders = self.reminders.lock().expect("reminder store lock poisoned");
        let next_id = reminders.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let reminder = Reminder { id: next_id, message, trigger_time, repeat, command, triggered: false };
        reminders.push(reminder.clone());
        drop(reminders);
        self.persist()?;
        Ok(reminder)
    }

    fn due(&self, now: DateTime<Utc>) -> Vec<Reminder> {
        self.reminders
            .lock()
            .expect("reminder store lock poisoned")
            .iter()
            .filter(|r| !r.triggered && parse_time(&r.trigger_time).map(|t| t <= now).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Marks a one-shot reminder as triggered, or reschedules a
    /// repeating one to its next cron-computed occurrence.
    fn advance(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let mut reminders = self.reminders.lock().expect("reminder store lock poisoned");
        if let Some(reminder) = reminders.iter_mut().find(|r| r.id == id) {
            match next_occurrence(reminder.repeat, now) {
                Some(next) => reminder.trigger_time = next.to_rfc3339(),
                None => reminder.triggered = true,
            }
        }
        drop(reminders);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let reminders = self.reminders.lock().expect("reminder store lock poisoned");
        let content = serde_json::to_string_pretty(&*reminders)?;
        std::fs::write(&self.path, content).context("failed to write reminders.json")
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

/// `RepeatKind::None` has no next occurrence (one-shot). The repeating
/// kinds are expressed as standard 6-field cron expressions (seconds
/// included, as the `cron` crate requires) and resolved via
/// `Schedule::upcoming`.
fn next_occurrence(repeat: RepeatKind, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let expr = match repeat {
        RepeatKind::None => return None,
        RepeatKind::Hourly => "0 0 * * * *",
        RepeatKind::Daily => "0 0 0 * * *",
        RepeatKind::Weekly => "0 0 0 * * Mon",
    };
    Schedule::from_str(expr).ok()?.after(&after).next()
}

pub struct Scheduler {
    store: Arc<ReminderStore>,
    deps: Arc<OrchestratorDeps>,
    stdout: Arc<Mutex<tokio::io::Stdout>>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<ReminderStore>,
        deps: Arc<OrchestratorDeps>,
        stdout: Arc<Mutex<tokio::io::Stdout>>,
        poll_interval: Duration,
    ) -> Self {
        Scheduler { store, deps, stdout, poll_interval }
    }

    /// Spawns the 1s poll loop (§5). Due reminders fire a
    /// `reminder_fired` event; if the reminder carries a `command`, it
    /// is additionally run through a fresh orchestrator under a
    /// synthetic task id `reminder-<id>`, with its own `StopSignal` (not
    /// externally cancellable since no command references it).
    pub fn start(&self) {
        let store = self.store.clone();
        let deps = self.deps.clone();
        let stdout = self.stdout.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                for reminder in store.due(now) {
                    fire(&store, &deps, &stdout, reminder, now).await;
                }
            }
        });
    }
}

async fn fire(store: &Arc<ReminderStore>, deps: &Arc<OrchestratorDeps>, stdout: &Arc<Mutex<tokio::io::Stdout>>, reminder: Reminder, now: DateTime<Utc>) {
    let task_id = format!("reminder-{}", reminder.id);

    server::write_line(
        stdout,
        Some(&task_id),
        "reminder_fired",
        Some(serde_json::json!({ "message": reminder.message, "reminder_id": reminder.id })),
    )
    .await;

    if let Err(e) = store.advance(reminder.id, now) {
        tracing::warn!(error = %e, reminder_id = reminder.id, "failed to advance reminder schedule");
    }

    if let Some(command) = &reminder.command {
        let orchestrator = Orchestrator::new(deps.clone());
        let mut ctx = ExecutionContext::new(StopSignal::new());
        let mut emit = |_event: InternalEvent| {};
        let result = orchestrator.handle_execute(command, &mut ctx, &mut emit).await;
        let data = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
        server::write_line(stdout, Some(&task_id), "result", Some(data)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hourly_next_occurrence_is_in_the_future() {
        let now = Utc::now();
        let next = next_occurrence(RepeatKind::Hourly, now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn none_repeat_has_no_next_occurrence() {
        assert!(next_occurrence(RepeatKind::None, Utc::now()).is_none());
    }

    #[test]
    fn create_then_list_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::load(&dir.path().to_path_buf()).unwrap();
        let reminder = store
            .create("take a break".to_string(), Utc::now().to_rfc3339(), RepeatKind::None, None)
            .unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.list()[0].id, reminder.id);
    }

    #[test]
    fn due_reminder_is_reported_once_triggered_time_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::load(&dir.path().to_path_buf()).unwrap();
        let past = (Utc::now() - chrono::Duration::seconds(5)).to_rfc3339();
        store.create("past due".to_string(), past, RepeatKind::None, None).unwrap();
        assert_eq!(store.due(Utc::now()).len(), 1);
    }
}
