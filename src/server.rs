//! Server Loop (C8): reads newline-delimited JSON commands on stdin,
//! maintains a map of request-id -> `StopSignal`, and writes
//! newline-delimited JSON events on stdout behind a single write mutex
//! so concurrent tasks never interleave a partial line. Grounded on the
//! teacher's stdin-reader-task / stdout-writer-mutex shape (its
//! equivalent command loop lived in `main.rs`/`command_queue.rs`); the
//! command vocabulary and event envelope are new, per §4.9/§6.

use crate::orchestrator::{Orchestrator, OrchestratorDeps};
use crate::schema::{Command, ExecutionContext, InternalEvent, OutboundEvent, StopSignal};
use crate::support::event_filter::EventFilter;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

pub struct Server {
    deps: Arc<OrchestratorDeps>,
    stdout: Arc<Mutex<tokio::io::Stdout>>,
    tasks: Arc<Mutex<HashMap<String, StopSignal>>>,
    started_at: Instant,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn new(deps: Arc<OrchestratorDeps>) -> Self {
        Server {
            deps,
            stdout: Arc::new(Mutex::new(tokio::io::stdout())),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            started_at: Instant::now(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared stdout handle, for background workers (e.g. the reminder
    /// scheduler) that need to emit protocol lines outside the main
    /// command loop.
    pub fn stdout_handle(&self) -> Arc<Mutex<tokio::io::Stdout>> {
        self.stdout.clone()
    }

    pub async fn run(&self) {
        self.emit_ready().await;

        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "stdin read failed, shutting down");
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            self.handle_line(line).await;

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    async fn emit_ready(&self) {
        let event = json!({
            "type": "ready",
            "timestamp": now_epoch_secs(),
            "startup_time": self.started_at.elapsed().as_secs_f64(),
        });
        self.write_raw(event).await;
    }

    async fn handle_line(&self, line: String) {
        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                self.write_event(None, "error", Some(json!({ "message": format!("invalid JSON: {}", e) }))).await;
                return;
            }
        };

        let id_hint = value.get("id").and_then(Value::as_str).map(str::to_string);

        let command: Command = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                self.write_event(
                    id_hint.as_deref(),
                    "error",
                    Some(json!({ "message": format!("unrecognized command: {}", e) })),
                )
                .await;
                return;
            }
        };

        match command {
            Command::Ping { id } => {
                self.write_event(Some(&id), "pong", None).await;
            }
            Command::Stop { id } => {
                if let Some(stop) = self.tasks.lock().await.get(&id) {
                    stop.fire();
                }
                self.write_event(Some(&id), "stop_ack", None).await;
            }
            Command::Shutdown { id } => {
                self.write_event(Some(&id), "shutdown_ack", None).await;
                self.shutdown.store(true, Ordering::SeqCst);
            }
            Command::Execute { id, instruction, context } => {
                self.spawn_execute(id, instruction, context).await;
            }
        }
    }

    /// Builds a fresh `ExecutionContext` and `Orchestrator`, streams
    /// internal events through a per-task filter to stdout tagged with
    /// the task id, then emits the terminal `result` event (§4.8, §4.9).
    async fn spawn_execute(&self, id: String, instruction: String, context: Option<Value>) {
        let stop = StopSignal::new();
        self.tasks.lock().await.insert(id.clone(), stop.clone());

        let mut ctx = ExecutionContext::new(stop);
        if let Some(Value::Object(map)) = &context {
            for (key, value) in map {
                if let Some(index_str) = key.strip_prefix("_sensitive_confirmation_") {
                    if let (Ok(index), Some(confirmed)) = (index_str.parse::<usize>(), value.as_bool()) {
                        ctx.sensitive_confirmations.insert(index, confirmed);
                    }
                }
            }
        }

        let deps = self.deps.clone();
        let stdout = self.stdout.clone();
        let tasks = self.tasks.clone();

        tokio::spawn(async move {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<InternalEvent>();

            let writer_stdout = stdout.clone();
            let writer_id = id.clone();
            let writer = tokio::spawn(async move {
                let mut filter = EventFilter::new();
                while let Some(event) = rx.recv().await {
                    if let Some((mapped_type, data)) = filter.filter(&event) {
                        write_line(&writer_stdout, Some(&writer_id), &mapped_type, Some(data)).await;
                    }
                }
            });

            let orchestrator = Orchestrator::new(deps);
            let result = {
                let mut emit = move |event: InternalEvent| {
                    let _ = tx.send(event);
                };
                orchestrator.handle_execute(&instruction, &mut ctx, &mut emit).await
            };
            let _ = writer.await;

            let data = serde_json::to_value(&result).unwrap_or(Value::Null);
            write_line(&stdout, Some(&id), "result", Some(data)).await;

            tasks.lock().await.remove(&id);
        });
    }

    async fn write_event(&self, id: Option<&str>, kind: &str, data: Option<Value>) {
        write_line(&self.stdout, id, kind, data).await;
    }

    async fn write_raw(&self, value: Value) {
        let mut line = value.to_string();
        line.push('\n');
        let mut out = self.stdout.lock().await;
        if out.write_all(line.as_bytes()).await.is_ok() {
            let _ = out.flush().await;
        }
    }
}

pub(crate) async fn write_line(stdout: &Arc<Mutex<tokio::io::Stdout>>, id: Option<&str>, kind: &str, data: Option<Value>) {
    let event = OutboundEvent {
        kind: kind.to_string(),
        id: id.map(str::to_string),
        timestamp: now_epoch_secs(),
        data,
    };
    let mut line = match serde_json::to_string(&event) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize outbound event");
            return;
        }
    };
    line.push('\n');

    let mut out = stdout.lock().await;
    if let Err(e) = out.write_all(line.as_bytes()).await {
        tracing::error!(error = %e, "failed to write stdout line");
        return;
    }
    let _ = out.flush().await;
}

fn now_epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_epoch_secs_is_positive() {
        assert!(now_epoch_secs() > 0.0);
    }
}
