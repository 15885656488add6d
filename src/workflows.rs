//! Named workflow templates, persisted as `workflows.json` under the
//! config directory. Grounded on `schema::Workflow` plus the teacher's
//! JSON-file persistence idiom used for reminder/state snapshots in
//! `config_manager.rs`.

use crate::schema::Workflow;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Mutex;

pub struct WorkflowStore {
    path: PathBuf,
    workflows: Mutex<Vec<Workflow>>,
}

impl WorkflowStore {
    pub fn load(config_dir: &PathBuf) -> Result<Self> {
        let path = config_dir.join("workflows.json");
        let workflows = if path.exists() {
            let content = std::fs::read_to_string(&path).context("failed to read workflows.json")?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(WorkflowStore { path, workflows: Mutex::new(workflows) })
    }

    pub fn list(&self) -> Vec<Workflow> {
        self.workflows.lock().expect("workflow store lock poisoned").clone()
    }

    pub fn get(&self, name: &str) -> Option<Workflow> {
        self.workflows.lock().expect("workflow store lock poisoned").iter().find(|w| w.name == name).cloned()
    }

    /// Insert-or-update keyed on `name`, then persist to disk.
    pub fn upsert(&self, workflow: Workflow) -> Result<()> {
        {
            let mut workflows = self.workflows.lock().expect("workflow store lock poisoned");
            if let Some(existing) = workflows.iter_mut().find(|w| w.name == workflow.name) {
                *existing = workflow;
            } else {
                workflows.push(workflow);
            }
        }
        self.persist()
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        let removed = {
            let mut workflows = self.workflows.lock().expect("workflow store lock poisoned");
            let before = workflows.len();
            workflows.retain(|w| w.name != name);
            workflows.len() != before
        };
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    fn persist(&self) -> Result<()> {
        let workflows = self.workflows.lock().expect("workflow store lock poisoned");
        let content = serde_json::to_string_pretty(&*workflows)?;
        std::fs::write(&self.path, content).context("failed to write workflows.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(name: &str) -> Workflow {
        Workflow { name: name.to_string(), description: "desc".to_string(), instructions: vec!["step 1".into()] }
    }

    #[test]
    fn upsert_then_list_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkflowStore::load(&dir.path().to_path_buf()).unwrap();
        store.upsert(workflow("morning_routine")).unwrap();
        assert_eq!(store.list().len(), 1);

        let reloaded = WorkflowStore::load(&dir.path().to_path_buf()).unwrap();
        assert_eq!(reloaded.list().len(), 1);
        assert_eq!(reloaded.get("morning_routine").unwrap().description, "desc");
    }

    #[test]
    fn upsert_replaces_existing_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkflowStore::load(&dir.path().to_path_buf()).unwrap();
        store.upsert(workflow("a")).unwrap();
        let mut updated = workflow("a");
        updated.description = "updated".to_string();
        store.upsert(updated).unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("a").unwrap().description, "updated");
    }

    #[test]
    fn remove_deletes_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkflowStore::load(&dir.path().to_path_buf()).unwrap();
        store.upsert(workflow("a")).unwrap();
        assert!(store.remove("a").unwrap());
        assert!(store.list().is_empty());
    }
}
