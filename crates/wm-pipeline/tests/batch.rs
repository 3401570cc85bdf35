//! End-to-end batch runs over synthesized WAV fixtures.
//!
//! The real normalizer, composer and renderer are used; only the delivery
//! transcoder is replaced by an instrumented stand-in so no ffmpeg is
//! needed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use wm_av::normalize::{ConversionEntry, NativeConverter};
use wm_av::{ConversionCache, FormatNormalizer, ToolRegistry};
use wm_core::config::Config;
use wm_core::{DeliveryFormat, Error, Pair, PatternKind, WatermarkSettings};
use wm_pipeline::{BatchEvents, Exporter, JobScheduler, Transcoder, WatermarkPipeline};

fn write_tone(path: &Path, secs: f64, rate: u32, channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..(secs * rate as f64) as usize {
        let v = ((i as f32 * 0.03).sin() * 0.25 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            w.write_sample(v).unwrap();
        }
    }
    w.finalize().unwrap();
}

/// Copies the intermediate and records how many transcodes overlap.
#[derive(Default)]
struct InstrumentedTranscoder {
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl Transcoder for InstrumentedTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _format: DeliveryFormat,
    ) -> wm_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let copied = std::fs::copy(input, output);
        self.active.fetch_sub(1, Ordering::SeqCst);
        copied?;
        Ok(())
    }
}

/// Always fails, after leaving a partial file behind.
struct BrokenTranscoder;

#[async_trait]
impl Transcoder for BrokenTranscoder {
    async fn transcode(&self, _: &Path, output: &Path, _: DeliveryFormat) -> wm_core::Result<()> {
        std::fs::write(output, b"half")?;
        Err(Error::conversion("ffmpeg", Some(1), "Conversion failed!"))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
    scratch: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        write_tone(&input.join("tag.wav"), 0.2, 8000, 1);
        Self {
            _dir: dir,
            input,
            output,
            scratch,
        }
    }

    fn songs(&self, n: usize) -> Vec<Pair> {
        (1..=n)
            .map(|i| {
                let song = self.input.join(format!("song{i}.wav"));
                write_tone(&song, 1.0, 8000, 2);
                Pair::new(song, self.input.join("tag.wav"))
            })
            .collect()
    }

    fn pipeline(&self, transcoder: Arc<dyn Transcoder>) -> WatermarkPipeline {
        let cache = Arc::new(ConversionCache::new(64, 64, Duration::from_secs(60)));
        self.pipeline_with_cache(transcoder, cache)
    }

    fn pipeline_with_cache(
        &self,
        transcoder: Arc<dyn Transcoder>,
        cache: Arc<ConversionCache<String, ConversionEntry>>,
    ) -> WatermarkPipeline {
        let normalizer = Arc::new(FormatNormalizer::new(
            &self.scratch,
            cache,
            Arc::new(NativeConverter::new(Duration::from_secs(30))),
        ));
        WatermarkPipeline::new(normalizer, Exporter::new(transcoder, Duration::from_secs(30)))
            .with_workspace_root(self.scratch.join("work"))
            .with_seed(Some(7))
    }
}

fn settings() -> WatermarkSettings {
    WatermarkSettings {
        pattern: PatternKind::FadeInOut,
        volume: 0.5,
        initial_delay_secs: 0.1,
        loop_interval_secs: 0.3,
        randomness: 0.0,
        fade_duration_secs: 0.05,
    }
}

#[tokio::test]
async fn single_slot_never_overlaps_transcodes() {
    let fx = Fixture::new();
    let transcoder = Arc::new(InstrumentedTranscoder::default());
    let scheduler = JobScheduler::new(Arc::new(fx.pipeline(transcoder.clone())), 1);
    scheduler.queue(fx.songs(4), settings(), &fx.output).unwrap();

    let result = scheduler.start().await.unwrap();
    assert_eq!(result.success_count, 4, "{:?}", result.errors);
    assert_eq!(transcoder.calls.load(Ordering::SeqCst), 4);
    assert_eq!(transcoder.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn four_slots_run_transcodes_in_parallel() {
    let fx = Fixture::new();
    let transcoder = Arc::new(InstrumentedTranscoder::default());
    let scheduler = JobScheduler::new(Arc::new(fx.pipeline(transcoder.clone())), 4);
    scheduler.queue(fx.songs(8), settings(), &fx.output).unwrap();

    let result = scheduler.start().await.unwrap();
    assert_eq!(result.success_count, 8, "{:?}", result.errors);
    let max = transcoder.max_active.load(Ordering::SeqCst);
    assert!((2..=4).contains(&max), "max concurrent transcodes: {max}");
}

#[tokio::test]
async fn unreadable_primary_fails_only_its_pair() {
    let fx = Fixture::new();
    let pairs = fx.songs(5);
    std::fs::write(&pairs[2].primary, b"definitely not audio").unwrap();

    let transcoder = Arc::new(InstrumentedTranscoder::default());
    let scheduler = JobScheduler::new(Arc::new(fx.pipeline(transcoder)), 2);
    scheduler.queue(pairs, settings(), &fx.output).unwrap();

    let result = scheduler.start().await.unwrap();
    assert_eq!(result.success_count, 4);
    assert_eq!(result.errors.len(), 1);
    assert!(
        result.errors[0].starts_with("song3.wav + tag.wav: "),
        "{}",
        result.errors[0]
    );
}

#[tokio::test]
async fn deliverables_land_under_watermark_folder() {
    let fx = Fixture::new();
    let transcoder = Arc::new(InstrumentedTranscoder::default());
    let pipeline = fx.pipeline(transcoder).with_keep_intermediate(true);
    let current = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = Arc::clone(&current);
    let scheduler = JobScheduler::new(Arc::new(pipeline), 2).with_events(
        BatchEvents::noop()
            .on_current_pair(move |p, w| seen.lock().push(format!("{p}|{w}"))),
    );
    scheduler.queue(fx.songs(2), settings(), &fx.output).unwrap();

    let result = scheduler.start().await.unwrap();
    assert!(result.is_clean(), "{:?}", result.errors);

    let folder = fx.output.join("tag");
    assert!(folder.join("song1.mp3").is_file());
    assert!(folder.join("song2.mp3").is_file());
    assert!(folder.join("song1.intermediate.wav").is_file());
    assert!(std::fs::metadata(folder.join("song1.mp3")).unwrap().len() > 0);

    let mut current = current.lock().clone();
    current.sort();
    assert_eq!(current, vec!["song1.wav|tag.wav", "song2.wav|tag.wav"]);
}

#[tokio::test]
async fn convertible_inputs_are_normalized_first() {
    let fx = Fixture::new();
    // A WAV payload under a convertible extension goes through the native
    // converter before rendering.
    let song = fx.input.join("live.flac");
    write_tone(&song, 1.0, 8000, 2);
    let pairs = vec![Pair::new(&song, fx.input.join("tag.wav"))];

    let transcoder = Arc::new(InstrumentedTranscoder::default());
    let scheduler = JobScheduler::new(Arc::new(fx.pipeline(transcoder)), 1);
    scheduler.queue(pairs, settings(), &fx.output).unwrap();

    let result = scheduler.start().await.unwrap();
    assert_eq!(result.success_count, 1, "{:?}", result.errors);
    assert!(fx.output.join("tag").join("live.mp3").is_file());
    assert!(std::fs::read_dir(&fx.scratch)
        .unwrap()
        .filter_map(Result::ok)
        .any(|e| e.path().extension().is_some_and(|x| x == "wav")));
}

#[tokio::test]
async fn missing_ffmpeg_aborts_before_any_pair() {
    let fx = Fixture::new();
    let pipeline =
        WatermarkPipeline::from_config(&Config::default(), Arc::new(ToolRegistry::default()));
    let started = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&started);
    let scheduler = JobScheduler::new(Arc::new(pipeline), 2).with_events(
        BatchEvents::noop().on_current_pair(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );
    scheduler.queue(fx.songs(2), settings(), &fx.output).unwrap();

    let err = scheduler.start().await.unwrap_err();
    assert!(matches!(err, Error::ToolNotFound { .. }), "{err}");
    assert!(err.is_batch_fatal());
    assert_eq!(started.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn same_named_primaries_get_distinct_deliverables() {
    let fx = Fixture::new();
    let mut pairs = Vec::new();
    for folder in ["a", "b"] {
        let dir = fx.input.join(folder);
        std::fs::create_dir_all(&dir).unwrap();
        write_tone(&dir.join("song.wav"), 1.0, 8000, 2);
        pairs.push(Pair::new(dir.join("song.wav"), fx.input.join("tag.wav")));
    }

    let transcoder = Arc::new(InstrumentedTranscoder::default());
    let scheduler = JobScheduler::new(Arc::new(fx.pipeline(transcoder)), 1);
    scheduler.queue(pairs, settings(), &fx.output).unwrap();

    let result = scheduler.start().await.unwrap();
    assert_eq!(result.success_count, 2, "{:?}", result.errors);

    let folder = fx.output.join("tag");
    assert!(folder.join("song.mp3").is_file());
    assert!(folder.join("song (2).mp3").is_file());
    assert_eq!(std::fs::read_dir(&folder).unwrap().count(), result.success_count);
}

#[tokio::test]
async fn idle_cache_entries_are_dropped_during_a_batch() {
    let fx = Fixture::new();
    let mut pairs = Vec::new();
    for name in ["live1.flac", "live2.flac"] {
        let song = fx.input.join(name);
        write_tone(&song, 1.0, 8000, 2);
        pairs.push(Pair::new(song, fx.input.join("tag.wav")));
    }

    // Everything counts as idle, so each conversion sweeps the entries
    // left by earlier ones.
    let cache = Arc::new(ConversionCache::new(64, 64, Duration::ZERO));
    let transcoder = Arc::new(InstrumentedTranscoder::default());
    let pipeline = fx.pipeline_with_cache(transcoder, Arc::clone(&cache));
    let scheduler = JobScheduler::new(Arc::new(pipeline), 1);
    scheduler.queue(pairs, settings(), &fx.output).unwrap();

    let result = scheduler.start().await.unwrap();
    assert_eq!(result.success_count, 2, "{:?}", result.errors);
    // Only the last source looked at is still cached.
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn failed_pairs_leave_no_workspace_behind() {
    let fx = Fixture::new();
    let scheduler = JobScheduler::new(Arc::new(fx.pipeline(Arc::new(BrokenTranscoder))), 2);
    scheduler.queue(fx.songs(2), settings(), &fx.output).unwrap();

    let result = scheduler.start().await.unwrap();
    assert_eq!(result.success_count, 0);
    assert_eq!(result.errors.len(), 2);
    assert!(scheduler.temps().is_empty());

    let work = fx.scratch.join("work");
    assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    assert!(!fx.output.join("tag").exists());
}

#[tokio::test]
async fn unkeepable_intermediate_does_not_fail_the_pair() {
    let fx = Fixture::new();
    // A directory where the kept intermediate would go makes keeping it fail.
    let blocked = fx.output.join("tag").join("song1.intermediate.wav");
    std::fs::create_dir_all(&blocked).unwrap();

    let transcoder = Arc::new(InstrumentedTranscoder::default());
    let pipeline = fx.pipeline(transcoder).with_keep_intermediate(true);
    let scheduler = JobScheduler::new(Arc::new(pipeline), 1);
    scheduler.queue(fx.songs(1), settings(), &fx.output).unwrap();

    let result = scheduler.start().await.unwrap();
    assert!(result.is_clean(), "{:?}", result.errors);
    assert!(fx.output.join("tag").join("song1.mp3").is_file());
    assert!(blocked.is_dir());
}
