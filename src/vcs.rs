//! The filesystem/VCS collaborator: reading file content, resolving a diff
//! against a ref, and expanding glob patterns into concrete paths.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use crate::error::{Result, ReviewError};

/// External source-of-truth for file content, diffs, and path expansion.
#[async_trait]
pub trait Vcs: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String>;
    async fn diff(&self, git_ref: &str) -> Result<String>;
    async fn glob(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Normalize a path to use forward slashes, independent of platform.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// A [`Vcs`] backed by a real checkout on disk plus `git diff`.
pub struct LocalFilesystem {
    root: PathBuf,
}

impl LocalFilesystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(normalize_path(path))
    }
}

#[async_trait]
impl Vcs for LocalFilesystem {
    async fn read_file(&self, path: &str) -> Result<String> {
        let full = self.resolve(path);
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| ReviewError::file_unreadable(path, e.to_string()))
    }

    async fn diff(&self, git_ref: &str) -> Result<String> {
        let output = tokio::process::Command::new("git")
            .arg("diff")
            .arg(git_ref)
            .current_dir(&self.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ReviewError::Internal(format!("failed to spawn git diff: {e}")))?;
        if !output.status.success() {
            return Err(ReviewError::Internal(format!(
                "git diff {git_ref} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let full_pattern = self.root.join(pattern);
        let full_pattern = full_pattern.to_str().ok_or_else(|| {
            ReviewError::Internal(format!("glob pattern {pattern} is not valid UTF-8"))
        })?;
        let mut paths = Vec::new();
        let entries = glob::glob(full_pattern)
            .map_err(|e| ReviewError::Internal(format!("invalid glob pattern {pattern}: {e}")))?;
        for entry in entries.flatten() {
            let rel = entry.strip_prefix(&self.root).unwrap_or(&entry);
            paths.push(normalize_path(&rel.to_string_lossy()));
        }
        paths.sort();
        Ok(paths)
    }
}

/// True if `path` matches any of `ignore_patterns` (simple substring/glob
/// match against the forward-slash-normalized path).
pub fn is_ignored(path: &str, ignore_patterns: &[String]) -> bool {
    let normalized = normalize_path(path);
    ignore_patterns.iter().any(|pattern| {
        let pattern = pattern.trim_end_matches('/');
        if let Some(stripped) = pattern.strip_prefix('*') {
            normalized.ends_with(stripped)
        } else {
            normalized.contains(pattern)
        }
    })
}

/// Convenience used by callers that just want a `Path` for size checks etc.
pub fn as_path(path: &str) -> &Path {
    Path::new(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_converts_backslashes() {
        assert_eq!(normalize_path(r"a\b\c.go"), "a/b/c.go");
    }

    #[test]
    fn ignore_patterns_match_vendor_and_extensions() {
        let patterns = vec!["vendor/".to_string(), "*.min.js".to_string()];
        assert!(is_ignored("vendor/pkg/mod.go", &patterns));
        assert!(is_ignored("dist/app.min.js", &patterns));
        assert!(!is_ignored("src/main.go", &patterns));
    }

    #[tokio::test]
    async fn local_filesystem_reads_and_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.go"), "package main\n").unwrap();
        let vcs = LocalFilesystem::new(dir.path());
        let content = vcs.read_file("a.go").await.unwrap();
        assert_eq!(content, "package main\n");
        let matches = vcs.glob("*.go").await.unwrap();
        assert_eq!(matches, vec!["a.go".to_string()]);
    }

    #[tokio::test]
    async fn missing_file_reports_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = LocalFilesystem::new(dir.path());
        let err = vcs.read_file("missing.go").await.unwrap_err();
        assert!(matches!(err, ReviewError::FileUnreadable { .. }));
    }
}
