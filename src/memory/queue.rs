//! Memory write queue: `save_task_result` never blocks the caller.
//! Generalizes `command_queue.rs`'s lane pattern into a dedicated
//! single-concurrency "memory" lane, draining under a cross-process
//! file lock (`fs2`) before touching the structured/vector stores.

use crate::memory::advanced::discover_workflows;
use crate::memory::vector::{VectorStore, CORPUS_CONVERSATIONS};
use crate::memory::{structured, Memory};
use crate::schema::{StepRecord, Workflow};
use crate::workflows::WorkflowStore;
use fs2::FileExt;
use serde_json::Value;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 256;

pub struct SaveTaskResult {
    pub instruction: String,
    pub steps: Vec<StepRecord>,
    pub success: bool,
    pub duration_s: f64,
}

#[derive(Clone)]
pub struct MemoryQueue {
    tx: mpsc::Sender<SaveTaskResult>,
}

impl MemoryQueue {
    /// Spawns the drainer task and returns a handle. `lock_path` is the
    /// well-known cross-process lockfile (`.memory_lock` under the
    /// config directory).
    pub fn spawn(lock_path: PathBuf, vector: Arc<VectorStore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<SaveTaskResult>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                if let Err(e) = drain_one(&lock_path, &vector, task).await {
                    tracing::warn!(error = %e, "memory write failed, dropping");
                }
            }
        });

        MemoryQueue { tx }
    }

    /// Enqueues without acquiring the file lock; returns immediately.
    /// Queue-full drops with a warning (memory is best-effort).
    pub fn save_task_result(&self, entry: SaveTaskResult) {
        if self.tx.try_send(entry).is_err() {
            tracing::warn!("memory write queue full, dropping entry");
        }
    }
}

async fn drain_one(lock_path: &PathBuf, vector: &Arc<VectorStore>, task: SaveTaskResult) -> anyhow::Result<()> {
    let file = OpenOptions::new().write(true).create(true).open(lock_path)?;
    file.lock_exclusive()?;

    let result = async {
        let steps_json = serde_json::to_value(&task.steps)?;
        structured::add_instruction(&task.instruction, &steps_json, task.success, task.duration_s)?;

        let summary = format!(
            "Instruction: {} | success={} | steps={}",
            task.instruction,
            task.success,
            task.steps.len()
        );
        vector.add(CORPUS_CONVERSATIONS, &summary, Value::Null).await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    file.unlock()?;
    result
}

/// Hourly maintenance tick: vector compaction (handled internally by
/// lancedb on write, nothing additional needed here), structured
/// cleanup, advanced-state snapshot, workflow re-discovery, and
/// error-screenshot pruning (Open Question #2).
pub async fn maintenance_tick(
    memory: &Memory,
    workflow_store: &WorkflowStore,
    downloads_dir: &PathBuf,
    retention_days: i64,
    screenshot_cap: usize,
) {
    if let Err(e) = structured::cleanup_old_data(retention_days) {
        tracing::warn!(error = %e, "structured cleanup failed");
    }

    match structured::workflow_candidates(3) {
        Ok(candidates) => {
            let discovered = discover_workflows(candidates);
            for candidate in &discovered {
                let workflow = Workflow {
                    name: candidate.pattern_id.clone(),
                    description: format!(
                        "auto-discovered: \"{}\" repeated {} times ({:.0}% success)",
                        candidate.normalized,
                        candidate.occurrences,
                        candidate.success_rate * 100.0
                    ),
                    instructions: candidate.action_sequence.clone(),
                };
                if let Err(e) = workflow_store.upsert(workflow) {
                    tracing::warn!(error = %e, pattern_id = %candidate.pattern_id, "failed to persist discovered workflow");
                }
            }
            tracing::info!(count = discovered.len(), "workflow re-discovery tick complete");
        }
        Err(e) => tracing::warn!(error = %e, "workflow discovery failed"),
    }

    if let Err(e) = memory.snapshot_advanced_state() {
        tracing::warn!(error = %e, "advanced-state snapshot failed");
    }

    prune_screenshots(downloads_dir, 7, screenshot_cap);
}

fn prune_screenshots(downloads_dir: &PathBuf, max_age_days: i64, cap: usize) {
    let Ok(entries) = std::fs::read_dir(downloads_dir) else { return };
    let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(max_age_days as u64 * 86_400);

    let mut screenshots: Vec<(std::path::PathBuf, std::time::SystemTime)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.contains("error_") || n.contains("login_error"))
                .unwrap_or(false)
        })
        .filter_map(|e| e.metadata().ok().and_then(|m| m.modified().ok()).map(|mtime| (e.path(), mtime)))
        .collect();

    screenshots.sort_by_key(|(_, mtime)| std::cmp::Reverse(*mtime));

    for (idx, (path, mtime)) in screenshots.iter().enumerate() {
        if idx >= cap || *mtime < cutoff {
            let _ = std::fs::remove_file(path);
        }
    }
}
