//! Turning command-line paths into a batch of pairs.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use wm_av::normalize::is_supported_extension;
use wm_core::Pair;

/// Expand files and directories into the list of audio files they name.
///
/// Files are taken as given. Directories are walked recursively and only
/// files with a supported extension are kept, sorted by path. Hidden
/// entries are skipped. Duplicates are dropped, first occurrence wins.
pub fn collect_audio_files(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable entry: {e}");
                        None
                    }
                })
                .filter(|e| e.file_type().is_file() && has_supported_extension(e.path()))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            anyhow::bail!("Input does not exist: {}", path.display());
        }
    }

    let mut seen = std::collections::HashSet::new();
    files.retain(|f| seen.insert(f.clone()));
    Ok(files)
}

/// Every primary paired with every watermark, primaries outermost.
pub fn cartesian_pairs(primaries: &[PathBuf], watermarks: &[PathBuf]) -> Vec<Pair> {
    primaries
        .iter()
        .flat_map(|p| watermarks.iter().map(move |w| Pair::new(p, w)))
        .collect()
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(is_supported_extension)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}
