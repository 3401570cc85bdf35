//! Rendering and delivery transcoding.
//!
//! [`Exporter::render`] mixes a composition natively into a lossless WAV.
//! [`Exporter::transcode`] hands that intermediate to a [`Transcoder`]
//! (ffmpeg in production) to produce the delivery codec. Both stages run
//! under their own timeout and reject missing or empty output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use wm_av::{audio, ToolCommand, ToolRegistry};
use wm_compose::{Composition, GainSpec};
use wm_core::config::DeliveryConfig;
use wm_core::{DeliveryFormat, Error};

use crate::mix;

/// Converts an intermediate file to a delivery format.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Fail early if the transcoder cannot run at all.
    fn preflight(&self) -> wm_core::Result<()> {
        Ok(())
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: DeliveryFormat,
    ) -> wm_core::Result<()>;
}

/// ffmpeg-backed [`Transcoder`].
///
/// The ffmpeg path is resolved from the registry on every call so a missing
/// binary surfaces as `ToolNotFound`.
pub struct FfmpegTranscoder {
    tools: Arc<ToolRegistry>,
    delivery: DeliveryConfig,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(tools: Arc<ToolRegistry>, delivery: DeliveryConfig, timeout: Duration) -> Self {
        Self {
            tools,
            delivery,
            timeout,
        }
    }

    /// ffmpeg arguments for one transcode, after the common prologue.
    pub fn args_for(&self, input: &Path, output: &Path, format: DeliveryFormat) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-vn".into(),
            "-map".into(),
            "0:a:0".into(),
        ];
        args.extend(codec_args(format, self.delivery.bitrate.as_deref()));
        if let Some(rate) = self.delivery.sample_rate {
            args.push("-ar".into());
            args.push(rate.to_string());
        }
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

/// Codec flags per delivery format. `bitrate` overrides the default for
/// lossy codecs and is ignored for PCM and FLAC.
pub fn codec_args(format: DeliveryFormat, bitrate: Option<&str>) -> Vec<String> {
    let lossy = |codec: &str, default_rate: &str| -> Vec<String> {
        vec![
            "-c:a".into(),
            codec.into(),
            "-b:a".into(),
            bitrate.unwrap_or(default_rate).into(),
        ]
    };
    match format {
        DeliveryFormat::Mp3 => lossy("libmp3lame", "320k"),
        DeliveryFormat::M4a => {
            let mut args = lossy("aac", "256k");
            args.extend(["-movflags".into(), "+faststart".into()]);
            args
        }
        DeliveryFormat::Ogg => lossy("libvorbis", "192k"),
        DeliveryFormat::Opus => lossy("libopus", "160k"),
        DeliveryFormat::Wav => vec!["-c:a".into(), "pcm_s16le".into()],
        DeliveryFormat::Aiff => vec!["-c:a".into(), "pcm_s16be".into()],
        DeliveryFormat::Flac => vec!["-c:a".into(), "flac".into()],
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn preflight(&self) -> wm_core::Result<()> {
        self.tools.require("ffmpeg").map(|_| ())
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: DeliveryFormat,
    ) -> wm_core::Result<()> {
        let ffmpeg = self.tools.require("ffmpeg")?;
        ToolCommand::ffmpeg(&ffmpeg.path)
            .args(self.args_for(input, output, format))
            .operation(format!("transcode to {format}"))
            .timeout(self.timeout)
            .execute()
            .await?;
        Ok(())
    }
}

/// Render + transcode stages for one pair.
#[derive(Clone)]
pub struct Exporter {
    transcoder: Arc<dyn Transcoder>,
    render_timeout: Duration,
}

impl Exporter {
    pub fn new(transcoder: Arc<dyn Transcoder>, render_timeout: Duration) -> Self {
        Self {
            transcoder,
            render_timeout,
        }
    }

    pub fn transcoder(&self) -> &Arc<dyn Transcoder> {
        &self.transcoder
    }

    /// Decode both tracks, mix them per `composition` and `gain`, and write
    /// a 32-bit float WAV to `dest`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInputTrack`] if either input cannot be decoded.
    /// - [`Error::Timeout`] if rendering overruns; the render is cancelled.
    /// - [`Error::ExportFailure`] for any other rendering failure.
    pub async fn render(
        &self,
        primary: &Path,
        watermark: &Path,
        composition: &Composition,
        gain: &GainSpec,
        dest: &Path,
    ) -> wm_core::Result<PathBuf> {
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let (primary, watermark, dest) = (
            primary.to_path_buf(),
            watermark.to_path_buf(),
            dest.to_path_buf(),
        );
        let composition = composition.clone();
        let gain = gain.clone();
        let out = dest.clone();
        let started = Instant::now();

        let mut task = tokio::task::spawn_blocking(move || {
            let primary = audio::decode_audio(&primary, &worker_cancel)?;
            let watermark = audio::decode_audio(&watermark, &worker_cancel)?;
            let mixed = mix::mix(&primary, &watermark, &composition, &gain, &worker_cancel)?;
            audio::write_wav(&out, &mixed)
        });

        match tokio::time::timeout(self.render_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(as_export_failure(e)),
            Ok(Err(join)) => {
                return Err(Error::ExportFailure(format!("render task failed: {join}")))
            }
            Err(_elapsed) => {
                // Decode and mix stop at their next cancellation check; a
                // write already under way finishes and is removed below.
                cancel.cancel();
                let _ = task.await;
                let _ = std::fs::remove_file(&dest);
                tracing::warn!(dest = %dest.display(), after = ?self.render_timeout, "render timed out");
                return Err(Error::timeout("render", self.render_timeout));
            }
        }

        verify_output(&dest, "render")?;
        tracing::debug!(
            dest = %dest.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rendered intermediate"
        );
        Ok(dest)
    }

    /// Transcode `intermediate` into `dest` in the delivery `format`.
    pub async fn transcode(
        &self,
        intermediate: &Path,
        dest: &Path,
        format: DeliveryFormat,
    ) -> wm_core::Result<PathBuf> {
        let started = Instant::now();
        if let Err(e) = self.transcoder.transcode(intermediate, dest, format).await {
            let _ = std::fs::remove_file(dest);
            return Err(e);
        }
        verify_output(dest, "transcode")?;
        tracing::debug!(
            dest = %dest.display(),
            format = %format,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transcoded deliverable"
        );
        Ok(dest.to_path_buf())
    }
}

/// Keep the error kinds callers act on; fold the rest into `ExportFailure`.
fn as_export_failure(e: Error) -> Error {
    match e {
        Error::InvalidInputTrack { .. }
        | Error::ExportFailure(_)
        | Error::Cancelled
        | Error::Timeout { .. } => e,
        other => Error::ExportFailure(other.to_string()),
    }
}

fn verify_output(path: &Path, stage: &str) -> wm_core::Result<()> {
    match std::fs::metadata(path) {
        Ok(m) if m.len() > 0 => Ok(()),
        Ok(_) => Err(Error::ExportFailure(format!(
            "{stage} produced an empty file at {}",
            path.display()
        ))),
        Err(_) => Err(Error::ExportFailure(format!(
            "{stage} produced no file at {}",
            path.display()
        ))),
    }
}
