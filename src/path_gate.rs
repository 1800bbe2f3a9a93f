//! Path normalization and sandbox enforcement.
//!
//! Every file access — `read_file` and each entry the scanner accepts —
//! goes through the [`PathGate`]. A relative path is admitted only when it
//! normalizes cleanly (no `..`, no absolute escapes), lands under one of
//! the allowed roots, contains no symlink component, and fits under the
//! configured size cap. Everything else is `path_denied`.
//!
//! Symlink following is off for every root: even a link that points back
//! inside its own root is refused, so the resolved path is always the
//! literal path that was asked for.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::Source;

/// An allowed root: the workspace or one configured extra path.
#[derive(Debug, Clone)]
pub struct Root {
    pub path: PathBuf,
    pub kind: RootKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Workspace,
    Extra,
}

/// A path admitted by the gate.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub abs_path: PathBuf,
    /// Normalized root-relative path (forward slashes).
    pub rel_path: String,
    pub source: Source,
}

#[derive(Debug)]
pub struct PathGate {
    roots: Vec<Root>,
    max_file_bytes: u64,
}

impl PathGate {
    pub fn new(workspace: &Path, extra_paths: &[PathBuf], max_file_bytes: u64) -> PathGate {
        let mut roots = vec![Root {
            path: canonical_root(workspace),
            kind: RootKind::Workspace,
        }];
        for extra in extra_paths {
            roots.push(Root {
                path: canonical_root(extra),
                kind: RootKind::Extra,
            });
        }
        PathGate {
            roots,
            max_file_bytes,
        }
    }

    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    /// Resolve a user-supplied relative path against the allowed roots,
    /// first match wins (workspace before extras).
    pub fn resolve(&self, rel_path: &str) -> Result<ResolvedFile> {
        let normalized = normalize_rel_path(rel_path)
            .ok_or_else(|| Error::PathDenied(rel_path.to_string()))?;

        for (index, _) in self.roots.iter().enumerate() {
            if let Some(resolved) = self.resolve_under(index, &normalized)? {
                return Ok(resolved);
            }
        }
        Err(Error::PathDenied(rel_path.to_string()))
    }

    /// Resolve a relative path against one specific root. Returns
    /// `Ok(None)` when the file does not exist under that root or a
    /// symlink sits anywhere on the path; errors only on a size-cap
    /// violation.
    pub fn resolve_under(&self, root_index: usize, rel_path: &str) -> Result<Option<ResolvedFile>> {
        let root = &self.roots[root_index];
        let normalized = match normalize_rel_path(rel_path) {
            Some(n) => n,
            None => return Ok(None),
        };

        // Walk component by component; any symlink on the way is a refusal,
        // including links whose target stays inside the root.
        let mut probe = root.path.clone();
        for component in normalized.split('/') {
            probe.push(component);
            let meta = match fs::symlink_metadata(&probe) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(_) => return Ok(None),
            };
            if meta.file_type().is_symlink() {
                tracing::warn!(path = %probe.display(), "rejecting symlink on sandboxed path");
                return Ok(None);
            }
        }

        let meta = match fs::metadata(&probe) {
            Ok(meta) if meta.is_file() => meta,
            _ => return Ok(None),
        };
        if meta.len() > self.max_file_bytes {
            return Err(Error::PathDenied(format!(
                "{} exceeds the {} byte cap",
                normalized, self.max_file_bytes
            )));
        }

        let source = classify_source(root.kind, &normalized);
        Ok(Some(ResolvedFile {
            abs_path: probe,
            rel_path: normalized,
            source,
        }))
    }
}

/// Classify which source tag a root-relative path belongs to.
pub fn classify_source(root: RootKind, rel_path: &str) -> Source {
    match root {
        RootKind::Extra => Source::Extra,
        RootKind::Workspace => {
            if rel_path == "MEMORY.md" || rel_path.split('/').any(|c| c == "memory") {
                Source::Memory
            } else {
                Source::Workspace
            }
        }
    }
}

/// Normalize a relative path: forward slashes, no empty/`.`/`..`
/// components. Returns `None` when the path cannot be made safe.
pub fn normalize_rel_path(raw: &str) -> Option<String> {
    let unified = raw.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// The root itself may legitimately sit behind symlinks (`/tmp` on macOS);
/// canonicalize it once so prefix checks compare real paths.
fn canonical_root(root: &Path) -> PathBuf {
    root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn gate_for(root: &Path) -> PathGate {
        PathGate::new(root, &[], 1024 * 1024)
    }

    #[test]
    fn normalize_rejects_parent_segments() {
        assert!(normalize_rel_path("../secret.txt").is_none());
        assert!(normalize_rel_path("notes/../../etc/passwd").is_none());
    }

    #[test]
    fn normalize_strips_dot_segments() {
        assert_eq!(
            normalize_rel_path("./memory/./log.md").as_deref(),
            Some("memory/log.md")
        );
        assert!(normalize_rel_path(".").is_none());
        assert!(normalize_rel_path("").is_none());
    }

    #[test]
    fn classify_memory_paths() {
        assert_eq!(
            classify_source(RootKind::Workspace, "memory/2026-01-12.md"),
            Source::Memory
        );
        assert_eq!(
            classify_source(RootKind::Workspace, "MEMORY.md"),
            Source::Memory
        );
        assert_eq!(
            classify_source(RootKind::Workspace, "notes/todo.md"),
            Source::Workspace
        );
        assert_eq!(classify_source(RootKind::Extra, "anything.md"), Source::Extra);
    }

    #[test]
    fn resolve_accepts_in_root_file() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("memory")).unwrap();
        fs::write(tmp.path().join("memory/log.md"), "hello").unwrap();

        let gate = gate_for(tmp.path());
        let resolved = gate.resolve("memory/log.md").unwrap();
        assert_eq!(resolved.rel_path, "memory/log.md");
        assert_eq!(resolved.source, Source::Memory);
    }

    #[test]
    fn resolve_denies_missing_and_escaping_paths() {
        let tmp = TempDir::new().unwrap();
        let gate = gate_for(tmp.path());

        let err = gate.resolve("absent.md").unwrap_err();
        assert_eq!(err.kind(), "path_denied");

        let err = gate.resolve("../outside.md").unwrap_err();
        assert_eq!(err.kind(), "path_denied");
    }

    #[cfg(unix)]
    #[test]
    fn resolve_denies_symlink_escaping_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let outside = tmp.path().join("outside.md");
        fs::write(&outside, "secret").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("leak.md")).unwrap();

        let gate = gate_for(&root);
        let err = gate.resolve("leak.md").unwrap_err();
        assert_eq!(err.kind(), "path_denied");
    }

    #[cfg(unix)]
    #[test]
    fn resolve_denies_symlink_even_inside_root() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("real.md");
        fs::write(&target, "hello").unwrap();
        std::os::unix::fs::symlink(&target, tmp.path().join("alias.md")).unwrap();

        let gate = gate_for(tmp.path());
        assert!(gate.resolve("real.md").is_ok());
        let err = gate.resolve("alias.md").unwrap_err();
        assert_eq!(err.kind(), "path_denied");
    }

    #[cfg(unix)]
    #[test]
    fn resolve_denies_symlink_loop() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        std::os::unix::fs::symlink(&b, &a).unwrap();
        std::os::unix::fs::symlink(&a, &b).unwrap();

        let gate = gate_for(tmp.path());
        assert!(gate.resolve("a").is_err());
    }

    #[test]
    fn resolve_denies_oversized_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("big.md"), vec![b'x'; 64]).unwrap();

        let gate = PathGate::new(tmp.path(), &[], 16);
        let err = gate.resolve("big.md").unwrap_err();
        assert_eq!(err.kind(), "path_denied");
    }

    #[test]
    fn extra_roots_resolve_after_workspace() {
        let tmp = TempDir::new().unwrap();
        let workspace = tmp.path().join("ws");
        let extra = tmp.path().join("extra");
        fs::create_dir_all(&workspace).unwrap();
        fs::create_dir_all(&extra).unwrap();
        fs::write(extra.join("shared.md"), "extra content").unwrap();

        let gate = PathGate::new(&workspace, &[extra], 1024);
        let resolved = gate.resolve("shared.md").unwrap();
        assert_eq!(resolved.source, Source::Extra);
    }
}
