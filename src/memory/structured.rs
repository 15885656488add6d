//! Structured memory tier: a single-file `rusqlite` store with the six
//! named tables. Grounded on the teacher's `db.rs` for the
//! `lazy_static!`-guarded connection and migration idiom; the table set
//! itself is new (the teacher's ~15 other tables had no spec
//! counterpart and were dropped).

use crate::support::credential;
use anyhow::{Context, Result};
use chrono::Utc;
use lazy_static::lazy_static;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

lazy_static! {
    static ref DB_CONN: Mutex<Option<Connection>> = Mutex::new(None);
}

fn get_db_lock() -> std::sync::MutexGuard<'static, Option<Connection>> {
    match DB_CONN.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn init(db_path: &PathBuf) -> Result<()> {
    let conn = Connection::open(db_path).context("failed to open structured memory database")?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS preferences (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            category TEXT NOT NULL,
            confidence REAL NOT NULL,
            confirmed INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS recent_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            file_type TEXT NOT NULL,
            operation TEXT NOT NULL,
            tags TEXT NOT NULL,
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_recent_files_path ON recent_files(path);
        CREATE INDEX IF NOT EXISTS idx_recent_files_created ON recent_files(created_at);

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            summary TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT
        );
        CREATE TABLE IF NOT EXISTS knowledge_graph (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject TEXT NOT NULL,
            predicate TEXT NOT NULL,
            object TEXT NOT NULL,
            target TEXT,
            context TEXT,
            confidence REAL NOT NULL,
            importance REAL NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS habits (
            pattern_type TEXT NOT NULL,
            pattern_value TEXT NOT NULL,
            frequency INTEGER NOT NULL,
            last_seen TEXT NOT NULL,
            metadata TEXT NOT NULL,
            PRIMARY KEY (pattern_type, pattern_value)
        );
        CREATE TABLE IF NOT EXISTS instruction_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            instruction TEXT NOT NULL,
            normalized TEXT NOT NULL,
            steps TEXT NOT NULL,
            success INTEGER NOT NULL,
            duration_s REAL NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_instruction_history_normalized ON instruction_history(normalized);
        ",
    )
    .context("failed to run structured memory migrations")?;

    let mut guard = get_db_lock();
    *guard = Some(conn);
    Ok(())
}

/// Mirrors the original's `re.sub(r'[0-9.\-_/\\]', ' ', lower)`: digits,
/// dots, dashes, underscores, and slashes all fold to a space (not just
/// digits, and not preserving path separators), then runs of whitespace
/// collapse to one space.
pub fn normalize_instruction(instruction: &str) -> String {
    let lower = instruction.to_lowercase();
    let mut normalized = String::with_capacity(lower.len());
    let mut last_was_space = false;
    for ch in lower.chars() {
        let mapped = if ch.is_ascii_digit() || matches!(ch, '.' | '-' | '_' | '/' | '\\') {
            ' '
        } else {
            ch
        };
        if mapped.is_whitespace() {
            if !last_was_space {
                normalized.push(' ');
            }
            last_was_space = true;
        } else {
            normalized.push(mapped);
            last_was_space = false;
        }
    }
    normalized.trim().to_string()
}

pub fn set_preference(key: &str, value: &Value, category: &str, confidence: f64) -> Result<()> {
    let guard = get_db_lock();
    let conn = guard.as_ref().context("structured memory not initialized")?;
    let now = Utc::now().to_rfc3339();
    let stored_value = credential::obfuscate_if_sensitive(key, &value.to_string());
    conn.execute(
        "INSERT INTO preferences (key, value, category, confidence, confirmed, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value, category=excluded.category,
            confidence=excluded.confidence, updated_at=excluded.updated_at",
        params![key, stored_value, category, confidence, now],
    )?;
    Ok(())
}

pub fn get_preference(key: &str) -> Result<Option<Value>> {
    let guard = get_db_lock();
    let conn = guard.as_ref().context("structured memory not initialized")?;
    let raw: Option<String> = conn
        .query_row("SELECT value FROM preferences WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?;
    Ok(match raw {
        Some(v) => {
            let clear = credential::deobfuscate(&v);
            Some(serde_json::from_str(&clear).unwrap_or(Value::String(clear)))
        }
        None => None,
    })
}

pub fn record_habit(pattern_type: &str, pattern_value: &str) -> Result<()> {
    let guard = get_db_lock();
    let conn = guard.as_ref().context("structured memory not initialized")?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO habits (pattern_type, pattern_value, frequency, last_seen, metadata)
         VALUES (?1, ?2, 1, ?3, '{}')
         ON CONFLICT(pattern_type, pattern_value) DO UPDATE SET
            frequency = frequency + 1, last_seen = excluded.last_seen",
        params![pattern_type, pattern_value, now],
    )?;
    Ok(())
}

pub fn add_instruction(instruction: &str, steps: &Value, success: bool, duration_s: f64) -> Result<()> {
    let guard = get_db_lock();
    let conn = guard.as_ref().context("structured memory not initialized")?;
    let now = Utc::now().to_rfc3339();
    let normalized = normalize_instruction(instruction);
    conn.execute(
        "INSERT INTO instruction_history (instruction, normalized, steps, success, duration_s, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![instruction, normalized, steps.to_string(), success as i64, duration_s, now],
    )?;
    Ok(())
}

pub fn record_file(path: &str, file_type: &str, operation: &str, tags: &[String], metadata: &Value) -> Result<()> {
    let guard = get_db_lock();
    let conn = guard.as_ref().context("structured memory not initialized")?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO recent_files (path, file_type, operation, tags, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![path, file_type, operation, serde_json::to_string(tags)?, metadata.to_string(), now],
    )?;
    Ok(())
}

pub fn recent_files(limit: usize) -> Result<Vec<(String, String)>> {
    let guard = get_db_lock();
    let conn = guard.as_ref().context("structured memory not initialized")?;
    let mut stmt = conn.prepare(
        "SELECT path, operation FROM recent_files ORDER BY created_at DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn top_habits(limit: usize) -> Result<Vec<(String, String, i64)>> {
    let guard = get_db_lock();
    let conn = guard.as_ref().context("structured memory not initialized")?;
    let mut stmt = conn.prepare(
        "SELECT pattern_type, pattern_value, frequency FROM habits ORDER BY frequency DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub fn confirmed_preferences(limit: usize) -> Result<Vec<(String, String)>> {
    let guard = get_db_lock();
    let conn = guard.as_ref().context("structured memory not initialized")?;
    let mut stmt = conn.prepare(
        "SELECT key, value FROM preferences ORDER BY updated_at DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            let key: String = row.get(0)?;
            let raw: String = row.get(1)?;
            Ok((key, raw))
        })?
        .filter_map(|r| r.ok())
        .map(|(k, v)| (k, credential::deobfuscate(&v)))
        .collect();
    Ok(rows)
}

/// One discovered pattern group: the `normalized` instruction form, its
/// occurrence count, empirical success rate, and the step-type sequence
/// of every instance in the group (one sequence per recorded
/// instruction), for `advanced::discover_workflows`'s modal-sequence
/// extraction.
#[derive(Debug, Clone)]
pub struct WorkflowGroupRow {
    pub normalized: String,
    pub occurrences: i64,
    pub success_rate: f64,
    pub step_type_sequences: Vec<Vec<String>>,
}

/// Groups instruction history by `normalized` form; candidates with
/// `occurrences >= min_occurrences` are returned along with every
/// instance's step-type sequence (read from the `steps` column, which
/// the grouping query previously never selected).
pub fn workflow_candidates(min_occurrences: i64) -> Result<Vec<WorkflowGroupRow>> {
    let guard = get_db_lock();
    let conn = guard.as_ref().context("structured memory not initialized")?;
    let mut stmt = conn.prepare("SELECT normalized, steps, success FROM instruction_history")?;
    let rows: Vec<(String, String, bool)> = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)? != 0))
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut groups: HashMap<String, Vec<(Vec<String>, bool)>> = HashMap::new();
    for (normalized, steps_json, success) in rows {
        let sequence = extract_step_type_sequence(&steps_json);
        groups.entry(normalized).or_default().push((sequence, success));
    }

    let mut out: Vec<WorkflowGroupRow> = groups
        .into_iter()
        .filter(|(_, entries)| entries.len() as i64 >= min_occurrences)
        .map(|(normalized, entries)| {
            let occurrences = entries.len() as i64;
            let successes = entries.iter().filter(|(_, success)| *success).count() as f64;
            let success_rate = successes / occurrences as f64;
            let step_type_sequences = entries.into_iter().map(|(seq, _)| seq).collect();
            WorkflowGroupRow { normalized, occurrences, success_rate, step_type_sequences }
        })
        .collect();
    out.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
    Ok(out)
}

/// Reads the recorded step types in order from a serialized
/// `Vec<StepRecord>` (`[{"step":{"type":...},"result":{...}}, ...]`).
fn extract_step_type_sequence(steps_json: &str) -> Vec<String> {
    let value: Value = match serde_json::from_str(steps_json) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("step").and_then(|s| s.get("type")).and_then(Value::as_str))
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

/// Deletes entries older than `days` in every time-stamped table,
/// keeping the top-K most recent rows regardless of age.
pub fn cleanup_old_data(days: i64) -> Result<()> {
    let guard = get_db_lock();
    let conn = guard.as_ref().context("structured memory not initialized")?;
    let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
    const KEEP_TOP_K: i64 = 200;

    for (table, time_col) in [
        ("recent_files", "created_at"),
        ("knowledge_graph", "created_at"),
        ("instruction_history", "created_at"),
    ] {
        conn.execute(
            &format!(
                "DELETE FROM {table} WHERE {time_col} < ?1 AND id NOT IN (
                    SELECT id FROM {table} ORDER BY {time_col} DESC LIMIT ?2
                )"
            ),
            params![cutoff, KEEP_TOP_K],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_numbers_and_paths() {
        let n = normalize_instruction("Open /Users/alice/report2024.pdf  now");
        assert_eq!(n, "open users alice report pdf now");
    }

    #[test]
    fn preference_roundtrip() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        init(&tmp.path().to_path_buf()).unwrap();
        set_preference("theme", &Value::String("dark".into()), "ui", 0.9).unwrap();
        let got = get_preference("theme").unwrap();
        assert_eq!(got, Some(Value::String("dark".into())));
    }
}
