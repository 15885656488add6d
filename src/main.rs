//! Process entrypoint: wires the embedding service, memory subsystem,
//! intent router, planner, reflector, executor registry, plan
//! executor, orchestrator, scheduler, and server loop together. Logs
//! to stderr only (stdout is reserved for the protocol, per §4.9)
//! through `tracing-subscriber`, mirroring the teacher's startup
//! sequence in spirit (env-driven config, structured logging) though
//! every concrete collaborator wired here is new.

mod config_manager;
mod embedding;
mod error;
mod executor_registry;
mod intent_router;
mod llm;
mod memory;
mod orchestrator;
mod placeholder;
mod planner;
mod plan_executor;
mod reflector;
mod scheduler;
mod schema;
mod server;
mod support;
mod user_input;
mod workflows;

use config_manager::ConfigManager;
use embedding::{EmbeddingService, OpenAiEmbeddingService};
use executor_registry::{system_types, ExecutorRegistry, SystemExecutor};
use intent_router::IntentRouter;
use llm::LLMClient;
use memory::queue::MemoryQueue;
use memory::Memory;
use orchestrator::OrchestratorDeps;
use planner::Planner;
use reflector::Reflector;
use scheduler::{ReminderStore, Scheduler};
use server::Server;
use std::sync::Arc;
use workflows::WorkflowStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(ConfigManager::new());
    let config_dir = resolve_config_dir();
    if let Err(e) = std::fs::create_dir_all(&config_dir) {
        tracing::error!(error = %e, "failed to create config directory");
        std::process::exit(1);
    }

    let llm = match LLMClient::new() {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::warn!(error = %e, "LLM client unavailable; planner/reflector/embedding degrade to no-op");
            Arc::new(LLMClient::disabled())
        }
    };

    let embedding: Arc<dyn EmbeddingService> = Arc::new(OpenAiEmbeddingService::new(llm.clone()));
    embedding.start_loading();

    let memory = match Memory::new(&config_dir, embedding.clone()).await {
        Ok(m) => Arc::new(m),
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize memory subsystem");
            std::process::exit(1);
        }
    };

    let memory_queue = MemoryQueue::spawn(config_dir.join(".memory_lock"), memory.vector.clone());

    let intent_router = Arc::new(IntentRouter::new(embedding.clone()));
    let planner = Arc::new(Planner::new(llm.clone()));
    let downloads_dir = config_dir.join("downloads");
    let _ = std::fs::create_dir_all(&downloads_dir);
    let reflector = Arc::new(Reflector::new(Some(llm.clone()), downloads_dir.clone()));

    let registry = Arc::new(build_executor_registry());

    let deps = Arc::new(OrchestratorDeps {
        embedding: embedding.clone(),
        intent_router,
        memory,
        memory_queue,
        planner,
        registry,
        reflector,
        config: config.clone(),
    });

    let server = Server::new(deps.clone());

    let reminder_store = match ReminderStore::load(&config_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "failed to load reminder store");
            std::process::exit(1);
        }
    };
    let scheduler = Scheduler::new(reminder_store, deps.clone(), server.stdout_handle(), config.reminder_poll_interval());
    scheduler.start();

    let workflow_store = match WorkflowStore::load(&config_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "failed to load workflow store");
            std::process::exit(1);
        }
    };

    spawn_maintenance_tick(deps, workflow_store, downloads_dir, config);

    server.run().await;
}

/// Startup-time `step_type -> executor` dispatch table. Concrete
/// executor bodies (browser automation, IMAP, OCR, subprocess
/// sandboxing, …) are external collaborators per §1 — this kernel ships
/// only the dispatch table, so every catalogued type currently falls
/// through to the explaining `SystemExecutor` fallback until a real
/// implementation is registered in its place.
fn build_executor_registry() -> ExecutorRegistry {
    let mut all_types: Vec<String> = Vec::new();
    all_types.extend(executor_registry::filesystem_types().iter().map(|s| s.to_string()));
    all_types.extend(executor_registry::browser_types().iter().map(|s| s.to_string()));
    all_types.extend(executor_registry::email_types().iter().map(|s| s.to_string()));
    all_types.extend(system_types().iter().map(|s| s.to_string()));
    all_types.push("execute_python_script".to_string());
    all_types.push("visual_assist".to_string());

    ExecutorRegistry::builder().build(Arc::new(SystemExecutor::new(all_types)))
}

fn spawn_maintenance_tick(
    deps: Arc<OrchestratorDeps>,
    workflow_store: Arc<WorkflowStore>,
    downloads_dir: std::path::PathBuf,
    config: Arc<ConfigManager>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            memory::queue::maintenance_tick(
                &deps.memory,
                &workflow_store,
                &downloads_dir,
                config.memory_retention_days(),
                config.screenshot_retention_cap(),
            )
            .await;
        }
    });
}

fn resolve_config_dir() -> std::path::PathBuf {
    std::env::var("DESKJARVIS_CONFIG_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| dirs::home_dir().unwrap_or_else(std::env::temp_dir).join(".deskjarvis"))
}
