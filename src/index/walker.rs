//! Directory walking and file filtering for the index pipeline.
//!
//! Filters apply in order: directory excludes (names plus substring match on
//! the root-relative path), file excludes (glob on base name), includes
//! (glob, empty accepts all), test-convention excludes, and finally the
//! chunker-support filter.

use std::path::{Path, PathBuf};

use glob::Pattern;
use ignore::WalkBuilder;

use crate::chunking::ChunkerRegistry;
use crate::error::{Error, Result};

/// Directories never worth indexing.
const DEFAULT_DIR_EXCLUDES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    ".venv",
    "venv",
    "node_modules",
    "target",
    "vendor",
    "dist",
    "build",
    "out",
    "__pycache__",
    ".cache",
];

/// Test-file naming conventions across Go/TS/JS/Python/Rust/PHP/Ruby.
const TEST_FILE_GLOBS: &[&str] = &[
    "*_test.go",
    "*.test.ts",
    "*.test.tsx",
    "*.test.js",
    "*.test.jsx",
    "*.spec.ts",
    "*.spec.tsx",
    "*.spec.js",
    "*.spec.jsx",
    "test_*.py",
    "*_test.py",
    "conftest.py",
    "*Test.php",
    "*_test.php",
    "*_spec.rb",
    "*_test.rb",
];

/// Test-directory naming conventions.
const TEST_DIR_NAMES: &[&str] = &["__tests__", "testdata", "spec", "tests", "test"];

/// Compiled filter set for one index run.
pub(crate) struct FileFilter {
    includes: Vec<Pattern>,
    exclude_globs: Vec<Pattern>,
    exclude_substrings: Vec<String>,
    exclude_tests: bool,
    test_globs: Vec<Pattern>,
}

impl FileFilter {
    /// Compiles include/exclude patterns.
    ///
    /// Exclude entries containing glob metacharacters become base-name
    /// globs; plain entries exclude directories by name or path substring.
    pub(crate) fn new(
        includes: &[String],
        excludes: &[String],
        exclude_tests: bool,
    ) -> Result<Self> {
        let compile = |pattern: &String| {
            Pattern::new(pattern)
                .map_err(|e| Error::invalid_input(format!("invalid glob {pattern:?}: {e}")))
        };

        let includes = includes.iter().map(compile).collect::<Result<Vec<_>>>()?;

        let mut exclude_globs = Vec::new();
        let mut exclude_substrings = Vec::new();
        for pattern in excludes {
            if pattern.contains(['*', '?', '[']) {
                exclude_globs.push(compile(pattern)?);
            } else {
                exclude_substrings.push(pattern.clone());
            }
        }

        let test_globs = TEST_FILE_GLOBS
            .iter()
            .filter_map(|g| Pattern::new(g).ok())
            .collect();

        Ok(Self {
            includes,
            exclude_globs,
            exclude_substrings,
            exclude_tests,
            test_globs,
        })
    }

    /// Whether a directory should be pruned from the walk.
    pub(crate) fn skips_dir(&self, name: &str, rel_path: &str) -> bool {
        if DEFAULT_DIR_EXCLUDES.contains(&name) {
            return true;
        }
        if self.exclude_tests && TEST_DIR_NAMES.contains(&name) {
            return true;
        }
        self.exclude_substrings
            .iter()
            .any(|sub| name == sub || rel_path.contains(sub.as_str()))
    }

    /// Whether a file passes the exclude/include/test filters.
    pub(crate) fn accepts_file(&self, rel_path: &str, file_name: &str) -> bool {
        if self.exclude_globs.iter().any(|g| g.matches(file_name)) {
            return false;
        }
        if self
            .exclude_substrings
            .iter()
            .any(|sub| rel_path.contains(sub.as_str()))
        {
            return false;
        }
        if self.exclude_tests && self.test_globs.iter().any(|g| g.matches(file_name)) {
            return false;
        }
        if !self.includes.is_empty()
            && !self
                .includes
                .iter()
                .any(|g| g.matches(file_name) || g.matches(rel_path))
        {
            return false;
        }
        true
    }
}

/// Walks `root` and returns the accepted files as root-relative paths,
/// sorted for deterministic runs.
pub(crate) fn collect_files(
    root: &Path,
    filter: &FileFilter,
    registry: &ChunkerRegistry,
) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "walk entry error, skipping");
                continue;
            }
        };
        let path = entry.path();
        if path == root {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel_str = rel.to_string_lossy();

        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if is_dir {
            continue;
        }
        // Prune files under excluded directories by checking every ancestor
        // component name.
        let in_excluded_dir = rel.parent().is_some_and(|parent| {
            parent.components().any(|component| {
                let part = component.as_os_str().to_string_lossy();
                filter.skips_dir(&part, &part)
            })
        });
        if in_excluded_dir {
            continue;
        }

        if !filter.accepts_file(&rel_str, &name) {
            continue;
        }
        if registry.chunker_for_path(path).is_none() {
            continue;
        }
        files.push(rel.to_path_buf());
    }

    files.sort();
    Ok(files)
}
