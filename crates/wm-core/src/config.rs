//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for tools, batch execution, timeouts, watermark defaults,
//! delivery, naming, and caching. Every section defaults sensibly so a
//! completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::naming::NamingTemplate;
use crate::settings::{DeliveryFormat, WatermarkSettings};
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub batch: BatchConfig,
    pub timeouts: TimeoutsConfig,
    pub watermark: WatermarkSettings,
    pub delivery: DeliveryConfig,
    pub naming: NamingTemplate,
    pub cache: CacheConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings: Vec<String> = self
            .watermark
            .problems()
            .into_iter()
            .map(|p| format!("watermark: {p}"))
            .collect();

        if self.watermark.pattern.is_looping() && self.watermark.loop_interval_secs == 0.0 {
            warnings.push(format!(
                "watermark.loop_interval_secs is 0; pattern '{}' will insert only once",
                self.watermark.pattern
            ));
        }

        if self.batch.max_concurrency == 0 {
            warnings.push("batch.max_concurrency is 0; one worker will be used".into());
        }

        for (name, secs) in [
            ("native_conversion_secs", self.timeouts.native_conversion_secs),
            ("external_conversion_secs", self.timeouts.external_conversion_secs),
            ("render_secs", self.timeouts.render_secs),
            ("transcode_secs", self.timeouts.transcode_secs),
        ] {
            if secs == 0 {
                warnings.push(format!("timeouts.{name} is 0; every operation will time out"));
            }
        }

        if self.cache.max_entries == 0 {
            warnings.push("cache.max_entries is 0; conversion results will not be memoized".into());
        }

        if self.naming.date_format.trim().is_empty() && self.naming.include_date {
            warnings.push("naming.include_date is set but naming.date_format is empty".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Batch execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker slots used when background processing is enabled.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// When disabled, pairs are processed one at a time.
    #[serde(default = "default_true")]
    pub background_processing: bool,
    /// Convert inputs the renderer cannot read directly.
    #[serde(default = "default_true")]
    pub auto_convert: bool,
    /// Keep the lossless intermediate next to each deliverable.
    pub keep_intermediate: bool,
    /// Where converted inputs are cached. Defaults to the system temp dir.
    pub scratch_dir: Option<PathBuf>,
}

fn default_max_concurrency() -> usize {
    2
}

fn default_true() -> bool {
    true
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            background_processing: true,
            auto_convert: true,
            keep_intermediate: false,
            scratch_dir: None,
        }
    }
}

impl BatchConfig {
    /// Number of concurrent pair executions actually used.
    pub fn effective_concurrency(&self) -> usize {
        if self.background_processing {
            self.max_concurrency.max(1)
        } else {
            1
        }
    }

    /// Directory for converted inputs.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("wavemark-scratch"))
    }
}

/// Time budgets for each blocking operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub native_conversion_secs: u64,
    pub external_conversion_secs: u64,
    pub render_secs: u64,
    pub transcode_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            native_conversion_secs: 60,
            external_conversion_secs: 120,
            render_secs: 60,
            transcode_secs: 120,
        }
    }
}

impl TimeoutsConfig {
    pub fn native_conversion(&self) -> Duration {
        Duration::from_secs(self.native_conversion_secs)
    }

    pub fn external_conversion(&self) -> Duration {
        Duration::from_secs(self.external_conversion_secs)
    }

    pub fn render(&self) -> Duration {
        Duration::from_secs(self.render_secs)
    }

    pub fn transcode(&self) -> Duration {
        Duration::from_secs(self.transcode_secs)
    }
}

/// Delivery codec settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub format: DeliveryFormat,
    /// Bitrate for lossy formats, e.g. `"320k"`. Format default when unset.
    pub bitrate: Option<String>,
    /// Output sample rate in Hz. Source rate when unset.
    pub sample_rate: Option<u32>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            format: DeliveryFormat::Mp3,
            bitrate: None,
            sample_rate: None,
        }
    }
}

/// Conversion cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Sum of entry costs allowed before eviction (cost = 1 per entry plus
    /// 1 per converted file).
    pub max_cost: usize,
    /// Entries idle for longer than this are evicted.
    pub idle_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 512,
            max_cost: 1024,
            idle_secs: 600,
        }
    }
}

impl CacheConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}
