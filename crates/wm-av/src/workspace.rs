//! Workspace management for pair processing.
//!
//! A [`Workspace`] provides a scratch directory for the intermediate render
//! and the not-yet-final transcode output of one pair, and moves the
//! finished file into its deliverable location without ever exposing a
//! partially written file there. A [`TempRegistry`] collects temp paths
//! created across a whole batch so they can be purged once work drains.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

static WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Scratch directory for one pair.
///
/// The directory is registered with the batch's [`TempRegistry`] when it is
/// created and is not removed on drop. [`close`](Self::close) removes it
/// once the pair has delivered; a pair that fails leaves it for the batch
/// purge.
///
/// # Example
///
/// ```no_run
/// use wm_av::{TempRegistry, Workspace};
///
/// let temps = TempRegistry::new();
/// let workspace = Workspace::new(None, &temps).unwrap();
/// let tmp = workspace.temp_file("final.mp3");
/// // ... transcode into `tmp` ...
/// workspace.finalize(&tmp, std::path::Path::new("/out/tag/song.mp3")).unwrap();
/// workspace.close();
/// ```
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Create a workspace under `parent`, or under the system temp dir, and
    /// register it with `temps`.
    pub fn new(parent: Option<&Path>, temps: &TempRegistry) -> wm_core::Result<Self> {
        let parent = match parent {
            Some(dir) => dir.to_path_buf(),
            None => std::env::temp_dir(),
        };
        std::fs::create_dir_all(&parent)?;

        let dir = loop {
            let n = WORKSPACE_COUNTER.fetch_add(1, Ordering::Relaxed);
            let candidate = parent.join(format!("wavemark-{}-{n}", std::process::id()));
            match std::fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                // Left over by an earlier process with the same pid.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        };
        temps.register(&dir);
        Ok(Self { dir })
    }

    /// Path to the scratch directory.
    pub fn temp_dir(&self) -> &Path {
        &self.dir
    }

    /// Create a path for a named temporary file inside the workspace.
    pub fn temp_file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Remove the scratch directory now instead of at the batch purge.
    pub fn close(self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.dir.display(), error = %e, "failed to remove workspace");
            }
        }
    }

    /// Move `produced` (a file inside this workspace) to `dest`.
    ///
    /// Parent directories of `dest` are created. The move is a rename when
    /// possible; across filesystems the file is copied to a hidden sibling of
    /// `dest` and renamed into place, so `dest` only ever holds a complete
    /// file. An existing `dest` is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if `produced` is missing or empty, or if any file
    /// operation fails.
    pub fn finalize(&self, produced: &Path, dest: &Path) -> wm_core::Result<PathBuf> {
        let size = std::fs::metadata(produced).map(|m| m.len()).map_err(|e| {
            wm_core::Error::ExportFailure(format!(
                "output file {} is missing: {e}",
                produced.display()
            ))
        })?;
        if size == 0 {
            return Err(wm_core::Error::ExportFailure(format!(
                "output file {} is empty",
                produced.display()
            )));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if std::fs::rename(produced, dest).is_err() {
            let partial = partial_path(dest);
            if let Err(e) = std::fs::copy(produced, &partial) {
                let _ = std::fs::remove_file(&partial);
                return Err(e.into());
            }
            if let Err(e) = std::fs::rename(&partial, dest) {
                let _ = std::fs::remove_file(&partial);
                return Err(e.into());
            }
            let _ = std::fs::remove_file(produced);
        }

        Ok(dest.to_path_buf())
    }
}

/// Hidden sibling of `dest` used while copying across filesystems.
fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    dest.with_file_name(format!(".{name}.partial"))
}

/// Batch-wide list of temporary paths awaiting cleanup.
///
/// Cloning shares the same underlying list.
#[derive(Debug, Clone, Default)]
pub struct TempRegistry {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl TempRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a path for later cleanup.
    pub fn register(&self, path: impl Into<PathBuf>) {
        self.paths.lock().push(path.into());
    }

    /// Number of paths currently registered.
    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    /// Take every registered path, leaving the registry empty.
    pub fn drain(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.paths.lock())
    }

    /// Drain the registry and delete each path (file or directory).
    ///
    /// Missing paths are ignored. Returns the number of paths removed.
    pub fn purge(&self) -> usize {
        let mut removed = 0;
        for path in self.drain() {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove temp path");
                }
            }
        }
        removed
    }
}
