//! Incremental file-tree scanner.
//!
//! Walks the allowed roots (workspace + extra paths), applies the
//! configured include/exclude globs and size cap, classifies each accepted
//! file by source tag, and emits [`ScanEntry`] records sorted by relative
//! path. SHA-256 hashes are computed lazily: a file whose
//! `(rel_path, mtime_ns, size)` triple matches the store's record reuses
//! the stored hash and is not read at all.

use std::collections::HashMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::ScanEntry;
use crate::path_gate::{classify_source, PathGate};

/// Store-side file metadata used to skip hashing unchanged files.
#[derive(Debug, Clone)]
pub struct KnownFile {
    pub id: i64,
    pub mtime_ns: i64,
    pub size_bytes: i64,
    pub sha256: String,
}

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/target/**",
];

/// Scan all roots and return accepted entries sorted by relative path.
pub fn scan(
    config: &Config,
    gate: &PathGate,
    known: &HashMap<String, KnownFile>,
) -> Result<Vec<ScanEntry>> {
    let scan_config = &config.memory_search.scan;
    let include_set = build_globset(&scan_config.include_globs)?;

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(scan_config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut entries = Vec::new();

    for (root_index, root) in gate.roots().iter().enumerate() {
        if !root.path.is_dir() {
            continue;
        }

        let walker = WalkDir::new(&root.path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = match entry.path().strip_prefix(&root.path) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let rel_str = match rel.to_str() {
                Some(s) => s.replace('\\', "/"),
                None => continue,
            };

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }

            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.len() > scan_config.max_file_bytes {
                tracing::debug!(path = %rel_str, size = meta.len(), "skipping oversized file");
                continue;
            }

            // Per-entry guard: the same gate used by read_file, so symlinked
            // escapes are rejected here too.
            let resolved = match gate.resolve_under(root_index, &rel_str) {
                Ok(Some(r)) => r,
                Ok(None) | Err(_) => continue,
            };

            let mtime_ns = mtime_nanos(&meta);
            let size_bytes = meta.len() as i64;

            let (sha256, text) = match known.get(&resolved.rel_path) {
                Some(record)
                    if record.mtime_ns == mtime_ns && record.size_bytes == size_bytes =>
                {
                    (record.sha256.clone(), None)
                }
                _ => match read_and_hash(&resolved.abs_path) {
                    Some((sha, body)) => (sha, Some(body)),
                    None => continue,
                },
            };

            entries.push(ScanEntry {
                rel_path: resolved.rel_path,
                source: classify_source(root.kind, &rel_str),
                mtime_ns,
                size_bytes,
                sha256,
                text,
            });
        }
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    entries.dedup_by(|a, b| a.rel_path == b.rel_path);
    Ok(entries)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(true)
}

fn mtime_nanos(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Read a file as UTF-8 and hash it. Non-UTF-8 files are skipped.
fn read_and_hash(path: &Path) -> Option<(String, String)> {
    let body = match std::fs::read_to_string(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "skipping unreadable file");
            return None;
        }
    };
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    Some((format!("{:x}", hasher.finalize()), body))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::ConfigInvalid(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::ConfigInvalid(format!("bad glob set: {}", e)))
}
