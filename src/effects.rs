//! Effect asset lookup.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Find an effect by case-insensitive substring of its file name.
///
/// Entries are checked in file-name order so the pick is stable across runs.
/// An empty name never matches.
pub async fn find_effect(fx_dir: &Path, name: &str) -> Result<PathBuf> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return Err(Error::EffectNotFound(name.to_string()));
    }

    let mut rd = match tokio::fs::read_dir(fx_dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("effects dir missing: {}", fx_dir.display());
            return Err(Error::EffectNotFound(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(ent) = rd.next_entry().await? {
        if ent.file_type().await?.is_file() {
            names.push(ent.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();

    names
        .into_iter()
        .find(|f| f.to_lowercase().contains(&needle))
        .map(|f| fx_dir.join(f))
        .ok_or_else(|| Error::EffectNotFound(name.to_string()))
}
