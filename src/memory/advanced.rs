//! Advanced memory tier: three in-memory analyzers over bounded ring
//! buffers. Grounded on the teacher's `analyzer.rs` buffer/process
//! pipeline shape and `pattern_detector.rs`'s accumulate-then-threshold
//! technique and `stable_pattern_id` idiom — the teacher's four
//! concrete pattern types are session-analytics-specific and do not
//! carry over; only the technique does.

use crate::memory::structured::WorkflowGroupRow;
use crate::schema::{Emotion, EmotionReading};
use chrono::Utc;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

const MAX_EMOTION_READINGS: usize = 100;

struct EmotionKeywords {
    emotion: Emotion,
    keywords: &'static [&'static str],
    suggestion: &'static str,
}

fn emotion_table() -> Vec<EmotionKeywords> {
    vec![
        EmotionKeywords {
            emotion: Emotion::Frustrated,
            keywords: &["ugh", "annoying", "stupid", "why won't", "frustrat", "气死", "烦"],
            suggestion: "Take a short break — I can keep this task queued.",
        },
        EmotionKeywords {
            emotion: Emotion::Anxious,
            keywords: &["worried", "anxious", "deadline", "urgent", "担心", "着急"],
            suggestion: "Let's break this into smaller, lower-risk steps.",
        },
        EmotionKeywords {
            emotion: Emotion::Tired,
            keywords: &["tired", "exhausted", "sleepy", "累", "困"],
            suggestion: "Want me to handle the rest and summarize when done?",
        },
        EmotionKeywords {
            emotion: Emotion::Happy,
            keywords: &["great", "awesome", "thanks", "nice", "开心", "太好了"],
            suggestion: "Glad that worked — anything else to automate?",
        },
    ]
}

pub struct EmotionAnalyzer {
    history: Vec<EmotionReading>,
}

impl EmotionAnalyzer {
    pub fn new() -> Self {
        EmotionAnalyzer { history: Vec::new() }
    }

    /// Last 100 readings, most recent last — the raw material persisted
    /// into `advanced_state.json` on the hourly maintenance tick.
    pub fn history(&self) -> &[EmotionReading] {
        &self.history
    }

    pub fn analyze(&mut self, text: &str) -> EmotionReading {
        let lower = text.to_lowercase();
        let mut best: Option<(Emotion, usize, &'static str)> = None;

        for row in emotion_table() {
            let hits = row.keywords.iter().filter(|kw| lower.contains(*kw)).count();
            if hits > 0 && best.as_ref().map(|(_, b, _)| hits > *b).unwrap_or(true) {
                best = Some((row.emotion, hits, row.suggestion));
            }
        }

        let reading = match best {
            Some((emotion, hits, suggestion)) => EmotionReading {
                emotion,
                confidence: (0.5 + 0.15 * hits as f64).min(1.0),
                keywords_found: emotion_table()
                    .into_iter()
                    .find(|r| r.emotion == emotion)
                    .map(|r| r.keywords.iter().filter(|kw| lower.contains(**kw)).map(|s| s.to_string()).collect())
                    .unwrap_or_default(),
                suggestion: suggestion.to_string(),
                timestamp: Utc::now().to_rfc3339(),
            },
            None => EmotionReading {
                emotion: Emotion::Neutral,
                confidence: 0.5,
                keywords_found: Vec::new(),
                suggestion: String::new(),
                timestamp: Utc::now().to_rfc3339(),
            },
        };

        self.history.push(reading.clone());
        if self.history.len() > MAX_EMOTION_READINGS {
            self.history.remove(0);
        }
        reading
    }
}

impl Default for EmotionAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowCandidate {
    pub pattern_id: String,
    pub normalized: String,
    pub occurrences: i64,
    pub success_rate: f64,
    pub action_sequence: Vec<String>,
}

/// Builds workflow-discovery candidates from structured-memory grouping
/// results (already filtered to `occurrences >= 3` by the caller),
/// extracting for each group the most common step-type sequence —
/// grounded on the original `advanced_memory.py::_extract_action_sequence`.
pub fn discover_workflows(grouped: Vec<WorkflowGroupRow>) -> Vec<WorkflowCandidate> {
    grouped
        .into_iter()
        .map(|group| WorkflowCandidate {
            pattern_id: stable_pattern_id(&group.normalized),
            action_sequence: modal_sequence(&group.step_type_sequences),
            normalized: group.normalized,
            occurrences: group.occurrences,
            success_rate: group.success_rate,
        })
        .collect()
}

/// Picks the most frequently occurring exact step-type sequence across
/// a group's instances; ties break on first-seen order.
fn modal_sequence(sequences: &[Vec<String>]) -> Vec<String> {
    let mut counts: HashMap<&Vec<String>, i64> = HashMap::new();
    let mut order: Vec<&Vec<String>> = Vec::new();
    for seq in sequences {
        if !counts.contains_key(seq) {
            order.push(seq);
        }
        *counts.entry(seq).or_insert(0) += 1;
    }
    let mut best: Option<(&Vec<String>, i64)> = None;
    for seq in order {
        let count = counts[seq];
        if best.map(|(_, b)| count > b).unwrap_or(true) {
            best = Some((seq, count));
        }
    }
    best.map(|(seq, _)| seq.clone()).unwrap_or_default()
}

fn stable_pattern_id(seed: &str) -> String {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    format!("wf_{:x}", hasher.finish())
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferenceCandidate {
    pub key: String,
    pub value: String,
    pub occurrences: i64,
}

/// Surfaces up to three preference candidates from a frequency table
/// (pattern_type, pattern_value, frequency) that cross a threshold.
pub fn proactive_preferences(
    habits: Vec<(String, String, i64)>,
    min_occurrences: i64,
) -> Vec<PreferenceCandidate> {
    let mut counts: HashMap<(String, String), i64> = HashMap::new();
    for (pattern_type, pattern_value, frequency) in habits {
        *counts.entry((pattern_type, pattern_value)).or_insert(0) += frequency;
    }
    let mut candidates: Vec<PreferenceCandidate> = counts
        .into_iter()
        .filter(|(_, freq)| *freq >= min_occurrences)
        .map(|((key, value), occurrences)| PreferenceCandidate { key, value, occurrences })
        .collect();
    candidates.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
    candidates.truncate(3);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_frustration_keywords() {
        let mut analyzer = EmotionAnalyzer::new();
        let reading = analyzer.analyze("ugh this is so annoying, why won't it work");
        assert_eq!(reading.emotion, Emotion::Frustrated);
        assert!(reading.confidence > 0.5);
    }

    #[test]
    fn neutral_when_no_keywords_match() {
        let mut analyzer = EmotionAnalyzer::new();
        let reading = analyzer.analyze("open the file browser");
        assert_eq!(reading.emotion, Emotion::Neutral);
    }

    #[test]
    fn stable_id_is_deterministic() {
        assert_eq!(stable_pattern_id("open browser"), stable_pattern_id("open browser"));
    }

    #[test]
    fn discover_workflows_extracts_modal_action_sequence() {
        let group = WorkflowGroupRow {
            normalized: "open browser and screenshot".into(),
            occurrences: 3,
            success_rate: 1.0,
            step_type_sequences: vec![
                vec!["app_open".into(), "screenshot_desktop".into()],
                vec!["app_open".into(), "screenshot_desktop".into()],
                vec!["app_open".into()],
            ],
        };
        let discovered = discover_workflows(vec![group]);
        assert_eq!(discovered.len(), 1);
        assert_eq!(
            discovered[0].action_sequence,
            vec!["app_open".to_string(), "screenshot_desktop".to_string()]
        );
    }

    #[test]
    fn modal_sequence_breaks_ties_on_first_seen() {
        let sequences = vec![vec!["a".to_string()], vec!["b".to_string()]];
        assert_eq!(modal_sequence(&sequences), vec!["a".to_string()]);
    }

    #[test]
    fn proactive_preferences_caps_at_three() {
        let habits = vec![
            ("naming_style".into(), "snake_case".into(), 5),
            ("preferred_dir".into(), "~/Downloads".into(), 4),
            ("active_hours".into(), "9-17".into(), 10),
            ("naming_style".into(), "kebab-case".into(), 1),
        ];
        let out = proactive_preferences(habits, 3);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].key, "active_hours");
    }
}
