//! Resolution of project-relative action paths to absolute paths.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::path::{GATE_DIR, is_gate_path, normalize_relative};
use crate::core::types::FileLookup;
use crate::error::ActionError;

/// Canonical project root plus the path-safety rules for action targets.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("canonicalize {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `raw` inside the root and outside `.actiongate/`.
    ///
    /// Symlinks are followed through the deepest existing ancestor, so a link
    /// pointing out of the project is rejected even when the final component
    /// does not exist yet.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ActionError> {
        let relative = normalize_relative(raw).map_err(ActionError::PathEscape)?;
        let joined = if relative == "." {
            self.root.clone()
        } else {
            self.root.join(&relative)
        };

        let mut existing = joined.as_path();
        while !existing.exists() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }
        let canonical = existing
            .canonicalize()
            .map_err(|err| ActionError::io(format!("canonicalize {}", existing.display()), err))?;
        let Ok(inside) = canonical.strip_prefix(&self.root) else {
            return Err(ActionError::PathEscape(raw.to_string()));
        };
        if is_gate_path(inside) {
            return Err(ActionError::PathEscape(format!(
                "{raw} is inside {GATE_DIR}"
            )));
        }
        Ok(joined)
    }

    /// Project-relative display form (forward slashes).
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let text = rel.to_string_lossy().replace('\\', "/");
        if text.is_empty() { ".".to_string() } else { text }
    }
}

impl FileLookup for Workspace {
    fn read(&self, path: &str) -> Option<String> {
        let resolved = self.resolve(path).ok()?;
        fs::read_to_string(resolved).ok()
    }

    fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|resolved| resolved.is_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn resolves_new_files_inside_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path()).expect("workspace");
        let resolved = ws.resolve("docs/new/readme.md").expect("resolve");
        assert!(resolved.starts_with(ws.root()));
        assert_eq!(ws.relative(&resolved), "docs/new/readme.md");
    }

    #[test]
    fn rejects_escapes_and_gate_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path()).expect("workspace");
        for raw in ["../x", "/etc/passwd", ".actiongate/state/actions.json", ""] {
            let err = ws.resolve(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PathEscape, "{raw}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlinks_leaving_the_root() {
        let outside = tempfile::tempdir().expect("outside");
        let temp = tempfile::tempdir().expect("tempdir");
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).expect("symlink");
        let ws = Workspace::new(temp.path()).expect("workspace");
        let err = ws.resolve("link/file.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathEscape);
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlinks_into_the_gate_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join(GATE_DIR).join("state")).expect("gate dir");
        std::os::unix::fs::symlink(temp.path().join(GATE_DIR), temp.path().join("sneaky"))
            .expect("symlink");
        let ws = Workspace::new(temp.path()).expect("workspace");
        let err = ws.resolve("sneaky/state/actions.json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathEscape);
    }

    #[test]
    fn file_lookup_reads_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("public")).expect("mkdir");
        fs::write(temp.path().join("public/a.css"), "a{}").expect("write");
        let ws = Workspace::new(temp.path()).expect("workspace");
        assert_eq!(ws.read("public/a.css").as_deref(), Some("a{}"));
        assert!(ws.is_dir("public"));
        assert!(ws.read("public/missing.css").is_none());
    }
}
