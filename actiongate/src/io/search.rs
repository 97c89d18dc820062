//! In-process repository search used by read-only `run_cmd` inspections.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use regex::{Regex, RegexBuilder};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::action::SearchSpec;
use crate::core::types::SearchMatch;

/// Repository search seam; tests substitute canned results.
pub trait RepoSearch {
    fn search(&self, spec: &SearchSpec) -> Result<Vec<SearchMatch>>;
}

/// Case-insensitive regex search over the project tree, sorted by path.
#[derive(Debug, Clone)]
pub struct WalkSearch {
    root: PathBuf,
    max_file_bytes: u64,
    exclude_dirs: Vec<String>,
}

impl WalkSearch {
    pub fn new(root: impl Into<PathBuf>, max_file_bytes: u64, exclude_dirs: Vec<String>) -> Self {
        Self {
            root: root.into(),
            max_file_bytes,
            exclude_dirs,
        }
    }

    fn excluded(&self, name: &str) -> bool {
        self.exclude_dirs.iter().any(|dir| dir == name)
    }
}

impl RepoSearch for WalkSearch {
    #[instrument(skip_all, fields(pattern = %spec.pattern, max_results = spec.max_results))]
    fn search(&self, spec: &SearchSpec) -> Result<Vec<SearchMatch>> {
        let regex = compile_pattern(&spec.pattern);
        let mut matches = Vec::new();

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !self.excluded(&entry.file_name().to_string_lossy())
            });

        'files: for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(err = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry
                .metadata()
                .is_ok_and(|meta| meta.len() > self.max_file_bytes)
            {
                continue;
            }
            let Ok(bytes) = fs::read(entry.path()) else {
                continue;
            };
            if bytes.contains(&0) {
                continue;
            }
            let text = String::from_utf8_lossy(&bytes);
            let file = relative_display(&self.root, entry.path());
            for (index, line) in text.lines().enumerate() {
                if let Some(found) = regex.find(line) {
                    matches.push(SearchMatch {
                        file: file.clone(),
                        line: index + 1,
                        col: found.start() + 1,
                        text: line.trim_end().to_string(),
                    });
                    if matches.len() >= spec.max_results {
                        break 'files;
                    }
                }
            }
        }

        debug!(hits = matches.len(), "search finished");
        Ok(matches)
    }
}

/// Case-insensitive regex; an invalid pattern is searched as a literal.
fn compile_pattern(pattern: &str) -> Regex {
    let build = |source: &str| {
        RegexBuilder::new(source)
            .case_insensitive(true)
            .size_limit(1 << 20)
            .build()
    };
    match build(pattern) {
        Ok(regex) => regex,
        Err(err) => {
            debug!(err = %err, "invalid search pattern; using literal");
            match build(&regex::escape(pattern)) {
                Ok(regex) => regex,
                Err(_) => Regex::new("$^").expect("empty-match regex"),
            }
        }
    }
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Render matches as `file:line:col:text` lines.
pub fn vimgrep_output(matches: &[SearchMatch]) -> String {
    let mut out = String::new();
    for hit in matches {
        out.push_str(&hit.vimgrep());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grounding::parse_vimgrep;

    fn project() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("public")).expect("mkdir");
        fs::create_dir_all(root.join("node_modules/pkg")).expect("mkdir");
        fs::create_dir_all(root.join(".actiongate/state")).expect("mkdir");
        fs::write(
            root.join("public/index.html"),
            "<html>\n  <div class=\"Banner\">Hi</div>\n</html>\n",
        )
        .expect("write");
        fs::write(root.join("public/styles.css"), ".banner { color: red; }\n").expect("write");
        fs::write(root.join("node_modules/pkg/banner.js"), "banner").expect("write");
        fs::write(root.join(".actiongate/state/actions.json"), "banner").expect("write");
        fs::write(root.join("public/logo.png"), b"banner\0\x01").expect("write");
        temp
    }

    fn search(root: &Path) -> WalkSearch {
        WalkSearch::new(
            root,
            1024 * 1024,
            vec!["node_modules".to_string(), ".actiongate".to_string()],
        )
    }

    #[test]
    fn finds_case_insensitive_hits_in_sorted_order() {
        let temp = project();
        let hits = search(temp.path())
            .search(&SearchSpec {
                pattern: "banner".to_string(),
                max_results: 10,
            })
            .expect("search");
        let files: Vec<&str> = hits.iter().map(|h| h.file.as_str()).collect();
        assert_eq!(files, vec!["public/index.html", "public/styles.css"]);
        assert_eq!(hits[0].line, 2);
        assert_eq!(hits[0].col, 15);
    }

    #[test]
    fn respects_max_results() {
        let temp = project();
        let hits = search(temp.path())
            .search(&SearchSpec {
                pattern: "banner".to_string(),
                max_results: 1,
            })
            .expect("search");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn invalid_regex_falls_back_to_literal() {
        let temp = project();
        fs::write(temp.path().join("public/app.js"), "call(foo\n").expect("write");
        let hits = search(temp.path())
            .search(&SearchSpec {
                pattern: "call(".to_string(),
                max_results: 10,
            })
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, "public/app.js");
    }

    #[test]
    fn output_parses_back_as_vimgrep() {
        let temp = project();
        let hits = search(temp.path())
            .search(&SearchSpec {
                pattern: "banner".to_string(),
                max_results: 10,
            })
            .expect("search");
        assert_eq!(parse_vimgrep(&vimgrep_output(&hits)), hits);
    }
}
