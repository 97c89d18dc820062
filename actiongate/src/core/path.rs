//! Lexical checks for project-relative action paths.
//!
//! These run before any filesystem access. Symlink escapes are caught later by
//! the workspace resolver, which canonicalizes existing ancestors.

use std::path::{Component, Path};

/// Directory owned by the gate itself; never a valid action target.
pub const GATE_DIR: &str = ".actiongate";

/// Normalize a project-relative path to `a/b/c` form.
///
/// Rejects empty paths, absolute paths, `..` components that climb above the
/// root, and anything under `.actiongate/`.
pub fn normalize_relative(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("path is empty".to_string());
    }
    let path = Path::new(trimmed);
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(format!("'{raw}' climbs above the project root"));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("'{raw}' is absolute"));
            }
        }
    }
    if parts.is_empty() {
        return Ok(".".to_string());
    }
    if parts[0] == GATE_DIR {
        return Err(format!("'{raw}' is inside {GATE_DIR}/"));
    }
    Ok(parts.join("/"))
}

/// True when `path` (relative to the root) lives under `.actiongate/`.
pub fn is_gate_path(path: &Path) -> bool {
    let mut components = path
        .components()
        .filter(|component| !matches!(component, Component::CurDir | Component::RootDir));

    match components.next() {
        Some(Component::Normal(name)) => name == GATE_DIR,
        _ => false,
    }
}

/// Final path component, used for backup names.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// File stem without extension (`public/styles.css` -> `styles`).
pub fn stem(path: &str) -> &str {
    let name = basename(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(
            normalize_relative("./public/../public/styles.css").as_deref(),
            Ok("public/styles.css")
        );
        assert_eq!(normalize_relative(".").as_deref(), Ok("."));
    }

    #[test]
    fn rejects_escapes_and_gate_paths() {
        assert!(normalize_relative("../etc/passwd").is_err());
        assert!(normalize_relative("/etc/passwd").is_err());
        assert!(normalize_relative("a/../../b").is_err());
        assert!(normalize_relative(".actiongate/state/actions.json").is_err());
        assert!(normalize_relative("").is_err());
    }

    #[test]
    fn gate_dir_must_be_first_component() {
        assert!(is_gate_path(&PathBuf::from("./.actiongate/OFF")));
        assert!(!is_gate_path(&PathBuf::from("src/.actiongate/x")));
        assert!(!is_gate_path(&PathBuf::from(".actiongatex/config")));
    }

    #[test]
    fn stem_strips_extension_only() {
        assert_eq!(stem("public/styles.css"), "styles");
        assert_eq!(stem(".env"), ".env");
        assert_eq!(basename("a/b/c.txt"), "c.txt");
    }
}
