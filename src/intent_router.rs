//! Fixed-intent fast path: classifies an instruction by cosine
//! similarity against cached canonical examples, applying per-intent
//! thresholds and a conflict penalty for app_open/app_close against
//! file-like text. Registry carried over verbatim from the reference's
//! `intent_router.py` since the distilled spec is silent on the
//! concrete intent vocabulary.

use crate::embedding::EmbeddingService;
use crate::schema::IntentMatch;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const DEFAULT_THRESHOLD: f32 = 0.65;
const CONFLICT_PENALTY: f32 = 0.4;

const EMAIL_KEYWORDS: &[&str] = &["email", "邮件", "inbox", "mailbox", "imap", "smtp"];

const FILE_KEYWORDS: &[&str] = &[
    "file", "文件", ".txt", ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".csv", ".png", ".jpg",
    ".jpeg", ".zip", ".mp4", ".mp3",
];

struct IntentDef {
    intent_type: &'static str,
    examples: &'static [&'static str],
    min_confidence: f32,
}

fn registry() -> Vec<IntentDef> {
    vec![
        IntentDef { intent_type: "translate", examples: &["translate this to english", "把这段话翻译成中文", "translate the selected text"], min_confidence: 0.65 },
        IntentDef { intent_type: "summarize", examples: &["summarize this document", "给我总结一下这段内容", "tl;dr this page"], min_confidence: 0.65 },
        IntentDef { intent_type: "polish", examples: &["polish this paragraph", "润色一下这段文字", "make this text more professional"], min_confidence: 0.65 },
        IntentDef { intent_type: "screenshot", examples: &["take a screenshot", "截个图", "capture my screen"], min_confidence: 0.6 },
        IntentDef { intent_type: "volume_control", examples: &["turn up the volume", "调大音量", "mute the sound"], min_confidence: 0.6 },
        IntentDef { intent_type: "brightness_control", examples: &["increase screen brightness", "调亮屏幕", "dim the display"], min_confidence: 0.6 },
        IntentDef { intent_type: "system_info", examples: &["show system info", "查看系统信息", "how much memory is free"], min_confidence: 0.6 },
        IntentDef { intent_type: "app_open", examples: &["open chrome", "打开微信", "launch vscode"], min_confidence: 0.7 },
        IntentDef { intent_type: "app_close", examples: &["close chrome", "关闭微信", "quit vscode"], min_confidence: 0.8 },
    ]
}

struct CachedIntent {
    def: IntentDef,
    example_embeddings: Vec<Vec<f32>>,
}

pub struct IntentRouter {
    embedding: Arc<dyn EmbeddingService>,
    intents: Mutex<Vec<CachedIntent>>,
    extra_examples: Mutex<HashMap<String, Vec<String>>>,
}

impl IntentRouter {
    pub fn new(embedding: Arc<dyn EmbeddingService>) -> Self {
        let intents = registry()
            .into_iter()
            .map(|def| CachedIntent { def, example_embeddings: Vec::new() })
            .collect();
        IntentRouter {
            embedding,
            intents: Mutex::new(intents),
            extra_examples: Mutex::new(HashMap::new()),
        }
    }

    /// Extends the registry with a runtime-learned example, appending
    /// its embedding to the cached matrix without recomputing the rest.
    pub async fn add_intent_example(&self, intent: &str, text: &str) {
        {
            let mut extra = self.extra_examples.lock().await;
            extra.entry(intent.to_string()).or_default().push(text.to_string());
        }
        let vec = self.embedding.encode(text).await;
        if vec.is_empty() {
            return;
        }
        let mut intents = self.intents.lock().await;
        if let Some(cached) = intents.iter_mut().find(|c| c.def.intent_type == intent) {
            if !cached.example_embeddings.is_empty() {
                cached.example_embeddings.push(vec);
            }
        }
    }

    pub async fn detect(&self, text: &str) -> Option<IntentMatch> {
        self.detect_with_threshold(text, DEFAULT_THRESHOLD).await
    }

    pub async fn detect_with_threshold(&self, text: &str, default_threshold: f32) -> Option<IntentMatch> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let lower = trimmed.to_lowercase();
        if EMAIL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            return None;
        }

        if !self.embedding.wait_until_ready(std::time::Duration::from_millis(1)).await {
            return None;
        }

        self.ensure_examples_cached().await;

        let query = self.embedding.encode(trimmed).await;
        if query.is_empty() {
            return None;
        }

        let intents = self.intents.lock().await;
        let mut best: Option<(&'static str, f32)> = None;
        for cached in intents.iter() {
            if cached.example_embeddings.is_empty() {
                continue;
            }
            let score = cached
                .example_embeddings
                .iter()
                .map(|ex| cosine_similarity(&query, ex))
                .fold(f32::MIN, f32::max);
            if best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((cached.def.intent_type, score));
            }
        }

        let (intent_type, mut score) = best?;

        if (intent_type == "app_open" || intent_type == "app_close") && has_file_conflict(&lower) {
            score -= CONFLICT_PENALTY;
        }

        let threshold = intents
            .iter()
            .find(|c| c.def.intent_type == intent_type)
            .map(|c| c.def.min_confidence)
            .unwrap_or(default_threshold);

        if score >= threshold {
            Some(IntentMatch {
                intent_type: intent_type.to_string(),
                confidence: score,
                metadata: serde_json::json!({}),
                is_fast_path: true,
            })
        } else {
            None
        }
    }

    async fn ensure_examples_cached(&self) {
        let needs_cache: Vec<usize> = {
            let intents = self.intents.lock().await;
            intents
                .iter()
                .enumerate()
                .filter(|(_, c)| c.example_embeddings.is_empty())
                .map(|(i, _)| i)
                .collect()
        };
        if needs_cache.is_empty() {
            return;
        }
        for idx in needs_cache {
            let examples: Vec<String> = {
                let intents = self.intents.lock().await;
                intents[idx].def.examples.iter().map(|s| s.to_string()).collect()
            };
            let embeddings = self.embedding.encode_batch(&examples).await;
            if embeddings.iter().any(|e| e.is_empty()) {
                continue;
            }
            let mut intents = self.intents.lock().await;
            intents[idx].example_embeddings = embeddings;
        }
    }
}

fn has_file_conflict(lower_text: &str) -> bool {
    if FILE_KEYWORDS.iter().any(|kw| lower_text.contains(kw)) {
        return true;
    }
    // absolute filesystem path heuristic: unix-style or windows drive letter
    lower_text.contains('/') && (lower_text.starts_with('/') || lower_text.contains(" /"))
        || lower_text.chars().nth(1) == Some(':')
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn file_conflict_detects_extension() {
        assert!(has_file_conflict("open report.pdf"));
        assert!(!has_file_conflict("open chrome"));
    }
}
