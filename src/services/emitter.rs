//! Merge & Emit
//!
//! Folds the qualified servers back through the registry's category groups
//! and renders the surviving channels as a categorized channel list.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::{OutputRecord, QualifiedSet};
use crate::services::registry::{CATEGORY_MARKER, EndpointRegistry};

/// Channels served by qualified servers, in registry order
///
/// Order is category declaration order, then server order within the
/// category, then channel order within the server. Repeated
/// (category, name, url) triples keep their first occurrence.
pub fn emit(registry: &EndpointRegistry, qualified: &QualifiedSet) -> Vec<OutputRecord> {
    let mut seen: HashSet<(&str, &str, &str)> = HashSet::new();
    let mut records = Vec::new();

    for category in registry.categories() {
        for group in category.servers() {
            if !qualified.contains(&group.server) {
                continue;
            }
            for channel in &group.channels {
                if seen.insert((
                    category.name.as_str(),
                    channel.name.as_str(),
                    channel.url.as_str(),
                )) {
                    records.push(OutputRecord {
                        category: category.name.clone(),
                        name: channel.name.clone(),
                        url: channel.url.clone(),
                    });
                }
            }
        }
    }

    debug!("Emitting {} channel record(s)", records.len());
    records
}

/// Render records as `category,#genre#` blocks, each followed by a blank line
///
/// Records of one category are expected to be contiguous, as `emit`
/// produces them.
pub fn render_channel_list(records: &[OutputRecord]) -> String {
    let mut out = String::new();
    let mut current: Option<&str> = None;

    for record in records {
        if current != Some(record.category.as_str()) {
            if current.is_some() {
                out.push('\n');
            }
            out.push_str(&record.category);
            out.push(',');
            out.push_str(CATEGORY_MARKER);
            out.push('\n');
            current = Some(record.category.as_str());
        }
        out.push_str(&record.name);
        out.push(',');
        out.push_str(&record.url);
        out.push('\n');
    }

    if current.is_some() {
        out.push('\n');
    }
    out
}

/// Replace `path` with `contents` without exposing a partial file
fn replace_file(path: &Path, contents: &[u8]) -> AppResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| AppError::io(parent, e))?;
    tmp.write_all(contents).map_err(|e| AppError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| AppError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| AppError::io(path, e.error))?;
    Ok(())
}

/// Atomic file replace, run on the blocking pool
pub async fn write_atomically(path: &Path, contents: Vec<u8>) -> AppResult<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || replace_file(&target, &contents))
        .await
        .map_err(|e| AppError::io(path, std::io::Error::other(e)))?
}

/// Render and atomically write the channel list
pub async fn write_channel_list(path: &Path, records: &[OutputRecord]) -> AppResult<()> {
    write_atomically(path, render_channel_list(records).into_bytes()).await
}
