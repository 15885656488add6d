pub mod advanced;
pub mod queue;
pub mod structured;
pub mod vector;

use crate::embedding::EmbeddingService;
use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use vector::VectorStore;

/// Facade aggregating the three memory tiers behind the C3 contract:
/// `context_for(instruction, include_vector, max_chars)`.
pub struct Memory {
    pub vector: Arc<VectorStore>,
    emotion: Mutex<advanced::EmotionAnalyzer>,
    state_path: PathBuf,
}

impl Memory {
    pub async fn new(
        config_dir: &PathBuf,
        embedding: Arc<dyn EmbeddingService>,
    ) -> Result<Self> {
        std::fs::create_dir_all(config_dir)?;

        let db_path = config_dir.join("memory.db");
        structured::init(&db_path)?;

        let vector_uri = config_dir.join("vector_memory");
        let vector = Arc::new(VectorStore::new(vector_uri.to_string_lossy().as_ref(), embedding).await?);

        Ok(Memory {
            vector,
            emotion: Mutex::new(advanced::EmotionAnalyzer::new()),
            state_path: config_dir.join("advanced_state.json"),
        })
    }

    /// Builds a human-readable context string for the planner, in the
    /// order the spec prescribes: emotion, structured highlights,
    /// vector neighbours, workflow suggestion. Truncated to `max_chars`.
    pub async fn context_for(&self, instruction: &str, include_vector: bool, max_chars: usize) -> String {
        let mut parts: Vec<String> = Vec::new();

        let emotion_reading = {
            let mut analyzer = self.emotion.lock().expect("emotion analyzer lock poisoned");
            analyzer.analyze(instruction)
        };
        if emotion_reading.emotion != crate::schema::Emotion::Neutral {
            parts.push(format!(
                "User mood: {:?} ({:.0}% confidence) — {}",
                emotion_reading.emotion,
                emotion_reading.confidence * 100.0,
                emotion_reading.suggestion
            ));
        }

        if let Ok(prefs) = structured::confirmed_preferences(5) {
            if !prefs.is_empty() {
                let list = prefs.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(", ");
                parts.push(format!("Preferences: {}", list));
            }
        }
        if let Ok(files) = structured::recent_files(5) {
            if !files.is_empty() {
                let list = files.iter().map(|(p, op)| format!("{} ({})", p, op)).collect::<Vec<_>>().join(", ");
                parts.push(format!("Recent files: {}", list));
            }
        }
        if let Ok(habits) = structured::top_habits(5) {
            if !habits.is_empty() {
                let list = habits.iter().map(|(t, v, f)| format!("{}:{} x{}", t, v, f)).collect::<Vec<_>>().join(", ");
                parts.push(format!("Habits: {}", list));
            }
        }

        if include_vector {
            let neighbours = self.vector.search_all(instruction, 3).await;
            for (corpus, hits) in neighbours {
                if !hits.is_empty() {
                    let list = hits.iter().map(|n| n.text.clone()).collect::<Vec<_>>().join(" | ");
                    parts.push(format!("{}: {}", corpus, list));
                }
            }
        }

        if let Ok(candidates) = structured::workflow_candidates(3) {
            let normalized = structured::normalize_instruction(instruction);
            if let Some(group) = candidates.iter().find(|g| g.normalized == normalized) {
                parts.push(format!(
                    "Matches a discovered workflow seen {} times ({:.0}% success rate).",
                    group.occurrences,
                    group.success_rate * 100.0
                ));
            }
        }

        let joined = parts.join("\n");
        truncate_with_ellipsis(&joined, max_chars)
    }

    /// Persists the advanced tier's actual in-memory state: the
    /// emotion-reading history, the proactive-learner's current
    /// preference candidates (derived from habit frequencies), and the
    /// workflow-discovery candidates (derived from instruction-history
    /// grouping). Per §4.3, this runs on the hourly maintenance tick.
    pub fn snapshot_advanced_state(&self) -> Result<()> {
        let emotion_history = {
            let analyzer = self.emotion.lock().expect("emotion analyzer lock poisoned");
            analyzer.history().to_vec()
        };

        let proactive_preference_candidates = structured::top_habits(20)
            .map(|habits| advanced::proactive_preferences(habits, 3))
            .unwrap_or_default();

        let discovered_workflows = structured::workflow_candidates(3)
            .map(advanced::discover_workflows)
            .unwrap_or_default();

        let snapshot = json!({
            "snapshot_at": chrono::Utc::now().to_rfc3339(),
            "emotion_history": emotion_history,
            "proactive_preference_candidates": proactive_preference_candidates,
            "discovered_workflows": discovered_workflows,
        });
        std::fs::write(&self.state_path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(())
    }
}

fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", truncated)
    }
}
