//! Path whitelist enforcement: accept inside home or sandbox, reject
//! under fixed system roots. Grounded on `tools/path_validator.py`,
//! generalized into a canonicalize-then-prefix-check function.

use std::path::{Path, PathBuf};

const DENYLISTED_ROOTS: &[&str] =
    &["/System", "/Library", "/usr", "/bin", "/sbin", "/etc", "/var", "/private"];

pub struct PathValidator {
    home: PathBuf,
    sandbox: Option<PathBuf>,
}

impl PathValidator {
    pub fn new(sandbox: Option<PathBuf>) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        PathValidator { home, sandbox }
    }

    /// Returns true if `path` resolves inside the home directory or the
    /// configured sandbox, and outside every denylisted system root.
    pub fn is_allowed(&self, path: &Path) -> bool {
        let resolved = canonicalize_best_effort(path);

        if resolved == Path::new("/") {
            return false;
        }

        for root in DENYLISTED_ROOTS {
            if resolved.starts_with(root) {
                return false;
            }
        }

        if resolved.starts_with(&self.home) {
            return true;
        }
        if let Some(sandbox) = &self.sandbox {
            if resolved.starts_with(sandbox) {
                return true;
            }
        }
        false
    }
}

fn canonicalize_best_effort(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_denylisted_root() {
        let v = PathValidator::new(None);
        assert!(!v.is_allowed(Path::new("/etc/passwd")));
        assert!(!v.is_allowed(Path::new("/")));
    }

    #[test]
    fn accepts_home_subdirectory() {
        let v = PathValidator::new(None);
        let p = v.home.join("Desktop/report.pdf");
        assert!(v.is_allowed(&p));
    }

    #[test]
    fn accepts_sandbox_path() {
        let sandbox = PathBuf::from("/tmp/deskjarvis_sandbox");
        let v = PathValidator::new(Some(sandbox.clone()));
        assert!(v.is_allowed(&sandbox.join("out.txt")));
    }
}
