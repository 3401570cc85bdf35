//! Input normalization.
//!
//! The renderer reads a fixed set of containers directly. Anything else is
//! converted once into a working file under a scratch directory, named by a
//! hash of the source identity so repeated calls (and separate runs) reuse
//! the same result. Conversion goes through one of two [`ConversionStrategy`]
//! implementations: the native decoder for formats it can read, ffmpeg for
//! everything else.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use wm_core::config::Config;
use wm_core::Error;

use crate::audio;
use crate::cache::ConversionCache;
use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Extensions the renderer reads without conversion.
pub const DIRECT_EXTENSIONS: &[&str] = &[
    "wav", "wave", "aif", "aiff", "aifc", "mp3", "m4a", "aac", "mp4",
];

/// Extensions accepted as input but converted before use.
pub const CONVERTIBLE_EXTENSIONS: &[&str] = &[
    "flac", "alac", "ape", "wv", "tta", "au", "snd", "caf", "ogg", "oga", "opus", "wma", "ac3",
    "dts", "amr", "mp2", "mka", "webm",
];

/// Convertible inputs that are lossy; they get an AAC intermediate instead
/// of PCM.
const LOSSY_EXTENSIONS: &[&str] = &["opus", "wma", "ac3", "dts", "amr", "mp2", "webm"];

/// Every extension wavemark accepts as input.
pub fn is_supported_extension(extension: &str) -> bool {
    let ext = extension.to_ascii_lowercase();
    DIRECT_EXTENSIONS.contains(&ext.as_str()) || CONVERTIBLE_EXTENSIONS.contains(&ext.as_str())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn classify(extension: &str) -> bool {
    CONVERTIBLE_EXTENSIONS.contains(&extension) && !DIRECT_EXTENSIONS.contains(&extension)
}

/// Working-file extension for a convertible input.
fn target_extension(extension: &str) -> &'static str {
    if audio::is_natively_decodable(extension) || !LOSSY_EXTENSIONS.contains(&extension) {
        "wav"
    } else {
        "m4a"
    }
}

/// Absolute path of the source as a string. Does not touch the filesystem.
fn source_identity(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute.to_string_lossy().into_owned()
}

fn identity_digest(identity: &str) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    hex::encode(&digest[..8])
}

/// Memoized conversion decision for one source identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionEntry {
    /// Fixed at first classification.
    pub needs_conversion: bool,
    /// Working file, once a conversion has succeeded.
    pub converted_path: Option<PathBuf>,
}

/// Which converter handles a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Native,
    External,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Native => write!(f, "native"),
            StrategyKind::External => write!(f, "external"),
        }
    }
}

/// A way of turning `source` into a working file at `dest`.
///
/// Implementations enforce their own timeout and must not leave a running
/// operation behind when they return.
#[async_trait]
pub trait ConversionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn convert(&self, source: &Path, dest: &Path) -> wm_core::Result<()>;
}

/// Decode with symphonia, write PCM WAV with hound.
#[derive(Debug, Clone)]
pub struct NativeConverter {
    timeout: Duration,
}

impl NativeConverter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ConversionStrategy for NativeConverter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Native
    }

    async fn convert(&self, source: &Path, dest: &Path) -> wm_core::Result<()> {
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let src = source.to_path_buf();
        let out = dest.to_path_buf();

        let mut task = tokio::task::spawn_blocking(move || {
            let buffer = audio::decode_audio(&src, &worker_cancel)?;
            audio::write_wav(&out, &buffer)
        });

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::Internal(format!("native conversion task failed: {join}"))),
            Err(_elapsed) => {
                // The decoder stops at its next packet; wait so nothing is
                // still writing to `dest` when we return.
                cancel.cancel();
                let _ = task.await;
                Err(Error::timeout("native conversion", self.timeout))
            }
        }
    }
}

/// Convert with an ffmpeg subprocess.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl FfmpegConverter {
    pub fn new(ffmpeg: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout,
        }
    }

    /// ffmpeg arguments for converting `source` into `dest`, after the
    /// common prologue. The codec follows `dest`'s extension.
    pub fn args_for(source: &Path, dest: &Path) -> Vec<String> {
        let codec: &[&str] = match extension_of(dest).as_str() {
            "m4a" => &["-c:a", "aac", "-b:a", "256k"],
            _ => &["-c:a", "pcm_s24le"],
        };
        let mut args = vec!["-i".to_string(), source.to_string_lossy().into_owned()];
        args.extend(["-vn", "-map", "0:a:0"].iter().chain(codec).map(|s| s.to_string()));
        args.push(dest.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl ConversionStrategy for FfmpegConverter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::External
    }

    async fn convert(&self, source: &Path, dest: &Path) -> wm_core::Result<()> {
        ToolCommand::ffmpeg(&self.ffmpeg)
            .args(Self::args_for(source, dest))
            .operation("input conversion")
            .timeout(self.timeout)
            .execute()
            .await?;
        Ok(())
    }
}

static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cache cost of a classified source.
const CLASSIFIED_COST: usize = 1;
/// Cache cost once a working file has been recorded for the source.
const CONVERTED_COST: usize = 2;

/// Decides whether inputs need conversion and performs it at most once per
/// source identity.
pub struct FormatNormalizer {
    scratch_dir: PathBuf,
    cache: Arc<ConversionCache<String, ConversionEntry>>,
    native: Arc<dyn ConversionStrategy>,
    external: Option<Arc<dyn ConversionStrategy>>,
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl FormatNormalizer {
    /// Normalizer with an explicit cache and native strategy. Without
    /// [`with_external`](Self::with_external), sources that need ffmpeg fail
    /// with `ToolNotFound`.
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        cache: Arc<ConversionCache<String, ConversionEntry>>,
        native: Arc<dyn ConversionStrategy>,
    ) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            cache,
            native,
            external: None,
            in_flight: DashMap::new(),
        }
    }

    pub fn with_external(mut self, external: Arc<dyn ConversionStrategy>) -> Self {
        self.external = Some(external);
        self
    }

    /// Build from configuration, wiring ffmpeg from the registry when found.
    pub fn from_config(config: &Config, tools: &ToolRegistry) -> Self {
        let cache = Arc::new(ConversionCache::from_config(&config.cache));
        let native = Arc::new(NativeConverter::new(config.timeouts.native_conversion()));
        let normalizer = Self::new(config.batch.scratch_dir(), cache, native);
        match tools.require("ffmpeg") {
            Ok(ffmpeg) => normalizer.with_external(Arc::new(FfmpegConverter::new(
                ffmpeg.path.clone(),
                config.timeouts.external_conversion(),
            ))),
            Err(_) => normalizer,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Whether `source` must be converted before rendering.
    ///
    /// Decided from the extension alone and memoized per source identity.
    pub fn needs_conversion(&self, source: &Path) -> bool {
        let identity = source_identity(source);
        let ext = extension_of(source);
        self.cache
            .get_or_insert_with(identity, CLASSIFIED_COST, || ConversionEntry {
                needs_conversion: classify(&ext),
                converted_path: None,
            })
            .needs_conversion
    }

    /// Strategy that would convert `source`.
    pub fn strategy_for(&self, source: &Path) -> StrategyKind {
        let ext = extension_of(source);
        if audio::is_natively_decodable(&ext) && target_extension(&ext) == "wav" {
            StrategyKind::Native
        } else {
            StrategyKind::External
        }
    }

    /// Canonical working-file path for `source`.
    pub fn target_path(&self, source: &Path) -> PathBuf {
        let ext = extension_of(source);
        let digest = identity_digest(&source_identity(source));
        self.scratch_dir
            .join(format!("{digest}.{}", target_extension(&ext)))
    }

    /// Fail with `ToolNotFound` if any of `sources` would need the external
    /// converter and none is configured.
    pub fn preflight<'a>(&self, sources: impl IntoIterator<Item = &'a Path>) -> wm_core::Result<()> {
        if self.external.is_some() {
            return Ok(());
        }
        for source in sources {
            if self.needs_conversion(source) && self.strategy_for(source) == StrategyKind::External
            {
                return Err(Error::tool_not_found("ffmpeg"));
            }
        }
        Ok(())
    }

    fn strategy(&self, kind: StrategyKind) -> wm_core::Result<&Arc<dyn ConversionStrategy>> {
        match kind {
            StrategyKind::Native => Ok(&self.native),
            StrategyKind::External => self
                .external
                .as_ref()
                .ok_or_else(|| Error::tool_not_found("ffmpeg")),
        }
    }

    /// Return a path the renderer can read for `source`.
    ///
    /// Directly usable sources are returned unchanged. Otherwise the working
    /// file is produced (or reused) at [`target_path`](Self::target_path).
    /// Concurrent calls for the same source share one conversion. Each call
    /// first evicts cache entries that have sat idle past the configured
    /// window.
    pub async fn convert(&self, source: &Path) -> wm_core::Result<PathBuf> {
        let evicted = self.cache.cleanup_idle();
        if evicted > 0 {
            tracing::debug!(evicted, "dropped idle conversion cache entries");
        }

        if !self.needs_conversion(source) {
            return Ok(source.to_path_buf());
        }

        let identity = source_identity(source);
        if let Some(path) = self.cached_path(&identity) {
            return Ok(path);
        }

        let lock = self
            .in_flight
            .entry(identity.clone())
            .or_default()
            .value()
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.convert_exclusive(source, &identity).await
        };

        // Last one out removes the lock; waiters still hold their clones.
        drop(lock);
        self.in_flight
            .remove_if(&identity, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// The part of [`convert`](Self::convert) run under the per-identity
    /// lock.
    async fn convert_exclusive(&self, source: &Path, identity: &str) -> wm_core::Result<PathBuf> {
        // Whoever held the lock before us may have finished the work.
        if let Some(path) = self.cached_path(identity) {
            return Ok(path);
        }

        let target = self.target_path(source);
        if is_non_empty_file(&target) {
            tracing::debug!(source = %source.display(), target = %target.display(), "reusing converted file");
            self.record(identity, &target);
            return Ok(target);
        }

        let kind = self.strategy_for(source);
        let strategy = self.strategy(kind)?;

        std::fs::create_dir_all(&self.scratch_dir)?;
        let partial = partial_path(&target);
        let started = Instant::now();

        tracing::info!(source = %source.display(), strategy = %kind, "converting input");

        let outcome = match strategy.convert(source, &partial).await {
            Ok(()) if is_non_empty_file(&partial) => {
                std::fs::rename(&partial, &target).map_err(Error::from)
            }
            Ok(()) => Err(Error::conversion(
                kind.to_string(),
                None,
                format!("conversion of {} produced no output", source.display()),
            )),
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            let _ = std::fs::remove_file(&partial);
            tracing::warn!(source = %source.display(), error = %e, "input conversion failed");
            return Err(e);
        }

        tracing::debug!(
            source = %source.display(),
            target = %target.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "input converted"
        );
        self.record(identity, &target);
        Ok(target)
    }

    fn cached_path(&self, identity: &str) -> Option<PathBuf> {
        self.cache
            .get(&identity.to_string())
            .and_then(|entry| entry.converted_path)
            .filter(|p| is_non_empty_file(p))
    }

    fn record(&self, identity: &str, target: &Path) {
        let key = identity.to_string();
        let updated = self.cache.update(&key, |entry| {
            if entry.converted_path.is_none() {
                entry.converted_path = Some(target.to_path_buf());
            }
        });
        if updated.is_some() {
            self.cache.reweigh(&key, CONVERTED_COST);
        } else {
            // Evicted since classification; re-seed with the known outcome.
            self.cache
                .get_or_insert_with(key, CONVERTED_COST, || ConversionEntry {
                    needs_conversion: true,
                    converted_path: Some(target.to_path_buf()),
                });
        }
    }
}

fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Unique sibling of `target` with the same extension, so tools that pick
/// the container from the extension still do the right thing.
fn partial_path(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = extension_of(target);
    let n = PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(".{stem}.{}-{n}.partial.{ext}", std::process::id()))
}
