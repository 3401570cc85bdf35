//! Native audio toolkit.
//!
//! Probing and decoding use symphonia; lossless writing uses hound. No
//! external process is involved, so everything here is blocking and meant
//! to run on a blocking thread (`tokio::task::spawn_blocking`). Long loops
//! check a [`CancellationToken`] between packets.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio_util::sync::CancellationToken;

use wm_core::Error;

/// Extensions the native decoder reads.
pub const NATIVE_EXTENSIONS: &[&str] = &[
    "wav", "wave", "aif", "aiff", "aifc", "mp3", "m4a", "mp4", "aac", "flac", "ogg", "oga",
];

/// Whether the native decoder handles files with this extension.
pub fn is_natively_decodable(extension: &str) -> bool {
    let ext = extension.to_ascii_lowercase();
    NATIVE_EXTENSIONS.contains(&ext.as_str())
}

/// Stream-level facts about an audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: usize,
    /// Short codec name reported by the decoder registry, e.g. `"pcm_s16le"`.
    pub codec: String,
}

impl AudioInfo {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs.max(0.0))
    }
}

/// Decoded interleaved PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            channels,
            sample_rate,
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Sample at `frame` for `channel`, mapping missing channels onto the
    /// last available one (mono sources feed every output channel).
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        if self.channels == 0 {
            return 0.0;
        }
        let ch = channel.min(self.channels - 1);
        self.samples
            .get(frame * self.channels + ch)
            .copied()
            .unwrap_or(0.0)
    }
}

struct OpenedTrack {
    format: Box<dyn FormatReader>,
    track_id: u32,
    codec_params: symphonia::core::codecs::CodecParameters,
}

fn open_track(path: &Path) -> wm_core::Result<OpenedTrack> {
    let file = File::open(path)
        .map_err(|e| Error::invalid_track(path, format!("cannot open file: {e}")))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::invalid_track(path, format!("unrecognized format: {e}")))?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::invalid_track(path, "no audio stream"))?;

    Ok(OpenedTrack {
        track_id: track.id,
        codec_params: track.codec_params.clone(),
        format,
    })
}

fn is_end_of_stream(err: &SymphoniaError) -> bool {
    matches!(err, SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

/// Probe an audio file without decoding it.
///
/// The duration comes from the header frame count when present, otherwise
/// from the sum of packet durations.
pub fn probe_audio(path: &Path) -> wm_core::Result<AudioInfo> {
    let OpenedTrack {
        mut format,
        track_id,
        codec_params,
    } = open_track(path)?;

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| Error::invalid_track(path, "unknown sample rate"))?;
    let channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);
    let codec = symphonia::default::get_codecs()
        .get_codec(codec_params.codec)
        .map(|d| d.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let duration_secs = match codec_params.n_frames {
        Some(frames) => frames as f64 / sample_rate as f64,
        None => {
            let mut total: u64 = 0;
            loop {
                match format.next_packet() {
                    Ok(packet) if packet.track_id() == track_id => total += packet.dur,
                    Ok(_) => {}
                    Err(ref e) if is_end_of_stream(e) => break,
                    Err(e) => {
                        return Err(Error::invalid_track(path, format!("packet read error: {e}")))
                    }
                }
            }
            match codec_params.time_base {
                Some(tb) => {
                    let t = tb.calc_time(total);
                    t.seconds as f64 + t.frac
                }
                None => total as f64 / sample_rate as f64,
            }
        }
    };

    if !(duration_secs > 0.0) {
        return Err(Error::invalid_track(path, "audio stream is empty"));
    }

    Ok(AudioInfo {
        duration_secs,
        sample_rate,
        channels,
        codec,
    })
}

/// Decode a whole file to interleaved `f32`.
///
/// # Errors
///
/// - [`Error::InvalidInputTrack`] if the file cannot be read or has no
///   audio stream.
/// - [`Error::Cancelled`] if `cancel` fires mid-decode.
pub fn decode_audio(path: &Path, cancel: &CancellationToken) -> wm_core::Result<AudioBuffer> {
    let OpenedTrack {
        mut format,
        track_id,
        codec_params,
    } = open_track(path)?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::invalid_track(path, format!("unsupported codec: {e}")))?;

    let mut buffer = AudioBuffer::new(
        codec_params.channels.map(|c| c.count()).unwrap_or(0),
        codec_params.sample_rate.unwrap_or(0),
    );
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(ref e) if is_end_of_stream(e) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::invalid_track(path, format!("packet read error: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                buffer.channels = spec.channels.count();
                buffer.sample_rate = spec.rate;

                let needs_new = sample_buf
                    .as_ref()
                    .map_or(true, |b| b.capacity() < decoded.capacity() * buffer.channels);
                if needs_new {
                    sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                }
                if let Some(sb) = sample_buf.as_mut() {
                    sb.copy_interleaved_ref(decoded);
                    buffer.samples.extend_from_slice(sb.samples());
                }
            }
            // Corrupt packets are skipped, as players do.
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(path = %path.display(), error = e, "skipping undecodable packet");
            }
            Err(e) => return Err(Error::invalid_track(path, format!("decode error: {e}"))),
        }
    }

    if buffer.channels == 0 || buffer.sample_rate == 0 || buffer.samples.is_empty() {
        return Err(Error::invalid_track(path, "no decodable audio"));
    }

    Ok(buffer)
}

/// Write a buffer as 32-bit float WAV.
pub fn write_wav(path: &Path, buffer: &AudioBuffer) -> wm_core::Result<()> {
    let spec = hound::WavSpec {
        channels: buffer.channels as u16,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
    for &sample in &buffer.samples {
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;
    Ok(())
}

fn wav_error(e: hound::Error) -> Error {
    match e {
        hound::Error::IoError(source) => Error::Io { source },
        other => Error::ExportFailure(format!("wav writer: {other}")),
    }
}

/// Per-bucket absolute peak (max over channels) for waveform display.
///
/// Returns `buckets` values in `[0, 1]`; shorter files yield fewer
/// non-zero buckets rather than an error.
pub fn extract_peaks(
    path: &Path,
    buckets: usize,
    cancel: &CancellationToken,
) -> wm_core::Result<Vec<f32>> {
    let buffer = decode_audio(path, cancel)?;
    Ok(peaks_of(&buffer, buckets))
}

/// Peak extraction over an already decoded buffer.
pub fn peaks_of(buffer: &AudioBuffer, buckets: usize) -> Vec<f32> {
    if buckets == 0 {
        return Vec::new();
    }
    let frames = buffer.frames();
    let mut peaks = vec![0.0f32; buckets];
    if frames == 0 {
        return peaks;
    }
    for frame in 0..frames {
        let bucket = (frame * buckets / frames).min(buckets - 1);
        let start = frame * buffer.channels;
        let frame_peak = buffer.samples[start..start + buffer.channels]
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        if frame_peak > peaks[bucket] {
            peaks[bucket] = frame_peak.min(1.0);
        }
    }
    peaks
}
