use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub struct ConfigManager {
    env_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Self {
        let env_path = PathBuf::from(".env");
        ConfigManager { env_path }
    }

    pub fn get_all(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Ok(content) = fs::read_to_string(&self.env_path) {
            for line in content.lines() {
                if let Some((key, val)) = line.split_once('=') {
                    map.insert(key.trim().to_string(), val.trim().to_string());
                }
            }
        }
        map
    }

    pub fn update(&self, key: &str, value: &str) -> Result<(), String> {
        let mut lines = Vec::new();
        let mut found = false;

        let content = fs::read_to_string(&self.env_path).unwrap_or_default();

        for line in content.lines() {
            if line.starts_with(key) && line.contains('=') {
                lines.push(format!("{}={}", key, value));
                found = true;
            } else {
                lines.push(line.to_string());
            }
        }

        if !found {
            lines.push(format!("{}={}", key, value));
        }

        fs::write(&self.env_path, lines.join("\n")).map_err(|e| e.to_string())
    }

    /// Bounded concurrency for the "llm" command-queue lane (env
    /// `LLM_LANE_CONCURRENCY`). Mirrors the reference's
    /// `AsyncLLMWrapper(max_workers=3)`.
    pub fn llm_lane_concurrency(&self) -> usize {
        env_usize("LLM_LANE_CONCURRENCY", 3)
    }

    pub fn routine_max_retries(&self) -> u32 {
        env_u32("ROUTINE_MAX_RETRIES", 1)
    }

    pub fn routine_retry_delay_secs(&self) -> u64 {
        env_u64("ROUTINE_RETRY_DELAY_SECS", 30)
    }

    pub fn rec_max_per_day(&self) -> i64 {
        env_i64("REC_MAX_PER_DAY", 3)
    }

    pub fn rec_min_confidence(&self) -> f64 {
        env_f64("REC_MIN_CONFIDENCE", 0.8)
    }

    pub fn rec_pattern_cooldown_hours(&self) -> i64 {
        env_i64("REC_PATTERN_COOLDOWN_HOURS", 72)
    }

    /// Sensitive-step confirmation window (§5: 30s).
    pub fn sensitive_gate_timeout(&self) -> Duration {
        Duration::from_secs(env_u64("SENSITIVE_GATE_TIMEOUT_SECS", 30))
    }

    pub fn sensitive_gate_poll_interval(&self) -> Duration {
        Duration::from_millis(env_u64("SENSITIVE_GATE_POLL_MS", 500))
    }

    /// User-input side channel timeout (§6: 300s).
    pub fn user_input_timeout(&self) -> Duration {
        Duration::from_secs(env_u64("USER_INPUT_TIMEOUT_SECS", 300))
    }

    /// Reminder scheduler poll cadence (§5: 1s).
    pub fn reminder_poll_interval(&self) -> Duration {
        Duration::from_secs(env_u64("REMINDER_POLL_SECS", 1))
    }

    /// LLM per-call timeout (§5: <= 60s).
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(env_u64("LLM_TIMEOUT_SECS", 60))
    }

    /// Embedding model load attempt timeout (§5: <= 300s).
    pub fn embedding_load_timeout(&self) -> Duration {
        Duration::from_secs(env_u64("EMBEDDING_LOAD_TIMEOUT_SECS", 300))
    }

    /// How long the orchestrator waits for the embedding model before
    /// skipping the fast path (§4.8: <= 3s).
    pub fn embedding_ready_wait(&self) -> Duration {
        Duration::from_millis(env_u64("EMBEDDING_READY_WAIT_MS", 3_000))
    }

    /// HTTP download timeout (§6: default 180s).
    pub fn http_download_timeout(&self) -> Duration {
        Duration::from_secs(env_u64("HTTP_DOWNLOAD_TIMEOUT_SECS", 180))
    }

    /// Default intent-match confidence floor when an intent carries no
    /// per-intent override (§4.2).
    pub fn default_intent_threshold(&self) -> f32 {
        env_f32("INTENT_DEFAULT_THRESHOLD", 0.65)
    }

    /// Plan-executor per-step attempt budget (§4.5).
    pub fn max_step_attempts(&self) -> u32 {
        env_u32("MAX_STEP_ATTEMPTS", 3)
    }

    /// Structured-memory retention window for `cleanup_old_data` (§4.3).
    pub fn memory_retention_days(&self) -> i64 {
        env_i64("MEMORY_RETENTION_DAYS", 90)
    }

    /// Error-screenshot retention: prune by age (days) and cap count.
    /// Open Question #2 resolution (see DESIGN.md).
    pub fn screenshot_retention_days(&self) -> i64 {
        env_i64("SCREENSHOT_RETENTION_DAYS", 7)
    }

    pub fn screenshot_retention_cap(&self) -> usize {
        env_usize("SCREENSHOT_RETENTION_CAP", 50)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn env_u32(key: &str, default_val: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}

fn env_u64(key: &str, default_val: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}

fn env_usize(key: &str, default_val: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}

fn env_i64(key: &str, default_val: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}

fn env_f64(key: &str, default_val: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}

fn env_f32(key: &str, default_val: f32) -> f32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let cfg = ConfigManager::new();
        assert_eq!(cfg.routine_max_retries(), 1);
        assert_eq!(cfg.llm_lane_concurrency(), 3);
        assert_eq!(cfg.sensitive_gate_timeout(), Duration::from_secs(30));
    }
}
