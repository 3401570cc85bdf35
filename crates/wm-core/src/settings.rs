//! Batch data model: pairs, watermark settings, delivery formats, results.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ---------------------------------------------------------------------------
// Pair
// ---------------------------------------------------------------------------

/// One unit of work: a primary track and the watermark to embed into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub primary: PathBuf,
    pub watermark: PathBuf,
}

impl Pair {
    pub fn new(primary: impl Into<PathBuf>, watermark: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            watermark: watermark.into(),
        }
    }

    /// File name of the primary track, for display.
    pub fn primary_name(&self) -> String {
        display_name(&self.primary)
    }

    /// File name of the watermark track, for display.
    pub fn watermark_name(&self) -> String {
        display_name(&self.watermark)
    }
}

/// Last path component as a lossy string, falling back to the whole path.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// File stem as a lossy string, falling back to the display name.
pub fn display_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| display_name(path))
}

// ---------------------------------------------------------------------------
// PatternKind
// ---------------------------------------------------------------------------

/// Where and how loudly the watermark is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    SingleAtStart,
    SingleAtEnd,
    RegularInterval,
    RandomInterval,
    FadeInOut,
    VaryingVolume,
}

impl PatternKind {
    pub const ALL: [PatternKind; 6] = [
        PatternKind::SingleAtStart,
        PatternKind::SingleAtEnd,
        PatternKind::RegularInterval,
        PatternKind::RandomInterval,
        PatternKind::FadeInOut,
        PatternKind::VaryingVolume,
    ];

    /// Stable snake_case identifier (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::SingleAtStart => "single_at_start",
            PatternKind::SingleAtEnd => "single_at_end",
            PatternKind::RegularInterval => "regular_interval",
            PatternKind::RandomInterval => "random_interval",
            PatternKind::FadeInOut => "fade_in_out",
            PatternKind::VaryingVolume => "varying_volume",
        }
    }

    /// Whether the pattern repeats the watermark on a loop interval.
    pub fn is_looping(&self) -> bool {
        !matches!(self, PatternKind::SingleAtStart | PatternKind::SingleAtEnd)
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        PatternKind::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| Error::Validation(format!("unknown pattern '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// WatermarkSettings
// ---------------------------------------------------------------------------

/// Snapshot of the watermark parameters for one batch.
///
/// Taken at queue time; edits made while a batch runs do not affect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkSettings {
    pub pattern: PatternKind,
    /// Watermark gain in `[0, 1]`.
    pub volume: f64,
    pub initial_delay_secs: f64,
    pub loop_interval_secs: f64,
    /// Relative jitter of the loop interval in `[0, 1]`.
    pub randomness: f64,
    pub fade_duration_secs: f64,
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            pattern: PatternKind::RegularInterval,
            volume: 0.3,
            initial_delay_secs: 5.0,
            loop_interval_secs: 30.0,
            randomness: 0.3,
            fade_duration_secs: 1.0,
        }
    }
}

impl WatermarkSettings {
    /// Return a list of problems that make these settings unusable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(0.0..=1.0).contains(&self.volume) {
            problems.push(format!("volume {} is outside [0, 1]", self.volume));
        }
        if !(0.0..=1.0).contains(&self.randomness) {
            problems.push(format!("randomness {} is outside [0, 1]", self.randomness));
        }
        if !(self.initial_delay_secs >= 0.0) {
            problems.push("initial delay must be >= 0".into());
        }
        if !(self.loop_interval_secs >= 0.0) {
            problems.push("loop interval must be >= 0".into());
        }
        if !(self.fade_duration_secs >= 0.0) {
            problems.push("fade duration must be >= 0".into());
        }
        problems
    }

    /// Validate the settings, failing with [`Error::Validation`].
    pub fn validate(&self) -> crate::Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// DeliveryFormat
// ---------------------------------------------------------------------------

/// Final codec/container requested for the deliverables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryFormat {
    Mp3,
    M4a,
    Wav,
    Aiff,
    Flac,
    Ogg,
    Opus,
}

impl DeliveryFormat {
    pub const ALL: [DeliveryFormat; 7] = [
        DeliveryFormat::Mp3,
        DeliveryFormat::M4a,
        DeliveryFormat::Wav,
        DeliveryFormat::Aiff,
        DeliveryFormat::Flac,
        DeliveryFormat::Ogg,
        DeliveryFormat::Opus,
    ];

    /// File extension for deliverables in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            DeliveryFormat::Mp3 => "mp3",
            DeliveryFormat::M4a => "m4a",
            DeliveryFormat::Wav => "wav",
            DeliveryFormat::Aiff => "aiff",
            DeliveryFormat::Flac => "flac",
            DeliveryFormat::Ogg => "ogg",
            DeliveryFormat::Opus => "opus",
        }
    }

    /// Whether the format is uncompressed PCM.
    pub fn is_pcm(&self) -> bool {
        matches!(self, DeliveryFormat::Wav | DeliveryFormat::Aiff)
    }
}

impl fmt::Display for DeliveryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for DeliveryFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "aif" => return Ok(DeliveryFormat::Aiff),
            "aac" | "mp4" => return Ok(DeliveryFormat::M4a),
            _ => {}
        }
        DeliveryFormat::ALL
            .into_iter()
            .find(|f| f.extension() == normalized)
            .ok_or_else(|| Error::Validation(format!("unknown delivery format '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Progress and results
// ---------------------------------------------------------------------------

/// Completed/total pair counts for a running batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressState {
    pub completed: usize,
    pub total: usize,
}

impl ProgressState {
    pub fn new(total: usize) -> Self {
        Self {
            completed: 0,
            total,
        }
    }

    /// Record one finished pair. Saturates at `total`.
    pub fn advance(&mut self) -> Self {
        if self.completed < self.total {
            self.completed += 1;
        }
        *self
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Outcome of a batch: how many pairs succeeded and why the others failed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub success_count: usize,
    pub errors: Vec<String>,
    /// Whether the batch was cancelled before every pair was dispatched.
    #[serde(default)]
    pub cancelled: bool,
}

impl BatchResult {
    pub fn failure_count(&self) -> usize {
        self.errors.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_display_names() {
        let pair = Pair::new("/music/album/song one.flac", "/tags/voice.wav");
        assert_eq!(pair.primary_name(), "song one.flac");
        assert_eq!(pair.watermark_name(), "voice.wav");
        assert_eq!(display_stem(&pair.primary), "song one");
    }

    #[test]
    fn pattern_parse_round_trip() {
        for pattern in PatternKind::ALL {
            assert_eq!(pattern.as_str().parse::<PatternKind>().unwrap(), pattern);
        }
        assert_eq!(
            "Fade-In-Out".parse::<PatternKind>().unwrap(),
            PatternKind::FadeInOut
        );
        assert!("sometimes".parse::<PatternKind>().is_err());
    }

    #[test]
    fn pattern_serde_is_snake_case() {
        let json = serde_json::to_string(&PatternKind::VaryingVolume).unwrap();
        assert_eq!(json, "\"varying_volume\"");
    }

    #[test]
    fn looping_patterns() {
        assert!(!PatternKind::SingleAtStart.is_looping());
        assert!(!PatternKind::SingleAtEnd.is_looping());
        assert!(PatternKind::RandomInterval.is_looping());
        assert!(PatternKind::FadeInOut.is_looping());
    }

    #[test]
    fn default_settings_are_valid() {
        assert!(WatermarkSettings::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_settings_rejected() {
        let settings = WatermarkSettings {
            volume: 1.5,
            randomness: -0.1,
            fade_duration_secs: -1.0,
            ..Default::default()
        };
        let problems = settings.problems();
        assert_eq!(problems.len(), 3, "{problems:?}");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn nan_settings_rejected() {
        let settings = WatermarkSettings {
            initial_delay_secs: f64::NAN,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn delivery_format_parsing() {
        assert_eq!("mp3".parse::<DeliveryFormat>().unwrap(), DeliveryFormat::Mp3);
        assert_eq!(".WAV".parse::<DeliveryFormat>().unwrap(), DeliveryFormat::Wav);
        assert_eq!("aif".parse::<DeliveryFormat>().unwrap(), DeliveryFormat::Aiff);
        assert_eq!("aac".parse::<DeliveryFormat>().unwrap(), DeliveryFormat::M4a);
        assert!("mkv".parse::<DeliveryFormat>().is_err());
        assert!(DeliveryFormat::Aiff.is_pcm());
        assert!(!DeliveryFormat::Opus.is_pcm());
    }

    #[test]
    fn progress_never_exceeds_total() {
        let mut progress = ProgressState::new(2);
        assert_eq!(progress.advance().completed, 1);
        assert_eq!(progress.advance().completed, 2);
        assert_eq!(progress.advance().completed, 2);
        assert!(progress.is_complete());
    }

    #[test]
    fn batch_result_counts() {
        let result = BatchResult {
            success_count: 4,
            errors: vec!["a.wav + b.wav: boom".into()],
            cancelled: false,
        };
        assert_eq!(result.failure_count(), 1);
        assert!(!result.is_clean());
        assert!(BatchResult::default().is_clean());
    }
}
