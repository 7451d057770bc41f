//! Bulk resource loading from a directory tree.
//!
//! Every `.json`, `.yaml`, and `.yml` file under the root is parsed as one
//! resource. Files that fail to parse or index are logged and skipped.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use nuggit_core::index::Index;
use nuggit_core::resource::Resource;
use nuggit_core::NameDigest;

use crate::resources;
use crate::sqlite_store::SqliteStore;

const RESOURCE_GLOBS: &[&str] = &["**/*.json", "**/*.yaml", "**/*.yml"];

const EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub skipped: usize,
}

/// Parse one resource file, choosing the decoder by extension.
pub fn load_file(path: &Path) -> Result<Resource> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read resource file: {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let resource = match ext {
        "json" => Resource::from_json(content.as_bytes()),
        "yaml" | "yml" => Resource::from_yaml(&content),
        other => bail!("Unsupported resource file extension: {:?}", other),
    };
    resource.with_context(|| format!("Failed to parse resource file: {}", path.display()))
}

/// Add every resource file under `root` to `index`.
pub fn add_fs(index: &mut Index, root: &Path) -> Result<LoadStats> {
    if !root.exists() {
        bail!("Resource directory does not exist: {}", root.display());
    }
    let include_set = build_globset(RESOURCE_GLOBS)?;
    let exclude_set = build_globset(EXCLUDE_GLOBS)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    // Sort for deterministic ordering
    paths.sort();

    let mut stats = LoadStats::default();
    for path in paths {
        match load_file(&path).and_then(|r| Ok(index.add(r)?)) {
            Ok(nd) => {
                debug!(path = %path.display(), id = %nd, "loaded resource");
                stats.loaded += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "skipping resource file");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

/// Load a single file or a directory tree into a new index.
pub fn load_path(path: &Path) -> Result<(Index, LoadStats)> {
    let mut index = Index::new();
    if path.is_dir() {
        let stats = add_fs(&mut index, path)?;
        return Ok((index, stats));
    }
    index.add(load_file(path)?)?;
    Ok((
        index,
        LoadStats {
            loaded: 1,
            skipped: 0,
        },
    ))
}

/// Store every resource of `index`, dependencies first, in one transaction.
pub async fn put_index(store: &SqliteStore, index: &Index) -> nuggit_core::Result<Vec<NameDigest>> {
    let qualified = index.qualified()?;
    let mut tx = store.pool().begin().await?;
    let mut stored = Vec::with_capacity(qualified.len());
    for item in qualified.topo() {
        let nd = item?;
        let Some(resource) = qualified.get(&nd) else {
            continue;
        };
        stored.push(resources::insert_resource(&mut tx, resource.clone()).await?);
    }
    tx.commit().await?;
    Ok(stored)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
