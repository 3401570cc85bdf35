use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use wm_core::{DeliveryFormat, PatternKind, WatermarkSettings};

#[derive(Parser)]
#[command(name = "wavemark")]
#[command(author, version, about = "Batch audio watermarking")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watermark every primary track with every watermark track
    Run {
        /// Primary tracks (files or directories)
        #[arg(short, long = "primary", required = true, num_args = 1..)]
        primaries: Vec<PathBuf>,

        /// Watermark tracks (files or directories)
        #[arg(short, long = "watermark", required = true, num_args = 1..)]
        watermarks: Vec<PathBuf>,

        /// Output folder; deliverables land in one sub-folder per watermark
        #[arg(short, long, required = true)]
        output: PathBuf,

        #[command(flatten)]
        pattern: PatternArgs,

        /// Delivery format (mp3, m4a, wav, aiff, flac, ogg, opus)
        #[arg(short, long)]
        format: Option<DeliveryFormat>,

        /// Pairs processed at once
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Feed inputs to the renderer as-is, without format normalization
        #[arg(long)]
        no_convert: bool,

        /// Keep the lossless intermediate next to each deliverable
        #[arg(long)]
        keep_intermediate: bool,
    },

    /// Print the composition and gain envelope for two track lengths as JSON
    Plan {
        /// Primary track length in seconds
        #[arg(long)]
        primary_duration: f64,

        /// Watermark track length in seconds
        #[arg(long)]
        watermark_duration: f64,

        #[command(flatten)]
        pattern: PatternArgs,
    },

    /// Print waveform peaks of an audio file as JSON
    Peaks {
        /// Audio file to analyse
        #[arg(required = true)]
        file: PathBuf,

        /// Number of peak buckets
        #[arg(short, long, default_value = "100")]
        buckets: usize,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Path to config file to validate
        config: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

/// Watermark placement flags; unset flags keep the configured value.
#[derive(Args, Debug, Default)]
pub struct PatternArgs {
    /// Insertion pattern (single_at_start, single_at_end, regular_interval,
    /// random_interval, fade_in_out, varying_volume)
    #[arg(long)]
    pub pattern: Option<PatternKind>,

    /// Watermark volume in [0, 1]
    #[arg(long)]
    pub volume: Option<f64>,

    /// Seconds before the first insertion
    #[arg(long)]
    pub delay: Option<f64>,

    /// Seconds between insertions
    #[arg(long)]
    pub interval: Option<f64>,

    /// Interval jitter in [0, 1] for random_interval
    #[arg(long)]
    pub randomness: Option<f64>,

    /// Fade length in seconds for fade_in_out
    #[arg(long)]
    pub fade: Option<f64>,

    /// Seed for random placement, for reproducible output
    #[arg(long)]
    pub seed: Option<u64>,
}

impl PatternArgs {
    /// Apply the flags that were given on top of `base`.
    pub fn apply(&self, base: &WatermarkSettings) -> WatermarkSettings {
        let mut settings = base.clone();
        if let Some(pattern) = self.pattern {
            settings.pattern = pattern;
        }
        if let Some(volume) = self.volume {
            settings.volume = volume;
        }
        if let Some(delay) = self.delay {
            settings.initial_delay_secs = delay;
        }
        if let Some(interval) = self.interval {
            settings.loop_interval_secs = interval;
        }
        if let Some(randomness) = self.randomness {
            settings.randomness = randomness;
        }
        if let Some(fade) = self.fade {
            settings.fade_duration_secs = fade;
        }
        settings
    }
}
