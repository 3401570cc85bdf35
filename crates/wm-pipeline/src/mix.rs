//! Sample-level rendering of a composition.

use tokio_util::sync::CancellationToken;

use wm_av::AudioBuffer;
use wm_compose::{Composition, GainSpec};
use wm_core::Error;

/// Frames mixed between cancellation checks.
const CANCEL_CHECK_FRAMES: usize = 1 << 16;

/// Mix `watermark` into `primary` following `composition` and `gain`.
///
/// The output has the primary's layout and length. Watermark channels map
/// onto output channels by index (a mono watermark feeds every channel) and
/// the watermark is resampled to the primary's rate by linear
/// interpolation. Output samples are clamped to `[-1, 1]`.
pub fn mix(
    primary: &AudioBuffer,
    watermark: &AudioBuffer,
    composition: &Composition,
    gain: &GainSpec,
    cancel: &CancellationToken,
) -> wm_core::Result<AudioBuffer> {
    if primary.channels == 0 || primary.sample_rate == 0 {
        return Err(Error::ExportFailure("primary buffer is empty".into()));
    }
    if watermark.channels == 0 || watermark.sample_rate == 0 || watermark.frames() == 0 {
        return Err(Error::ExportFailure("watermark buffer is empty".into()));
    }

    let channels = primary.channels;
    let rate = primary.sample_rate as f64;
    let frames = primary.frames();
    let wm_rate = watermark.sample_rate as f64;
    let wm_frames = watermark.frames();

    let mut out = AudioBuffer {
        samples: primary.samples[..frames * channels].to_vec(),
        channels,
        sample_rate: primary.sample_rate,
    };

    for segment in &composition.watermark_segments {
        let first = (segment.start * rate).round() as usize;
        let last = ((segment.end() * rate).round() as usize).min(frames);
        let mut levels = gain.cursor();

        for frame in first..last {
            if (frame - first) % CANCEL_CHECK_FRAMES == 0 && cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let t = frame as f64 / rate;
            let level = levels.volume_at(t) as f32;
            if level == 0.0 {
                continue;
            }

            let src_pos = (t - segment.start).max(0.0) * wm_rate;
            let i0 = src_pos.floor() as usize;
            if i0 >= wm_frames {
                break;
            }
            let i1 = (i0 + 1).min(wm_frames - 1);
            let frac = (src_pos - i0 as f64) as f32;

            for ch in 0..channels {
                let a = watermark.sample(i0, ch);
                let b = watermark.sample(i1, ch);
                let w = a + (b - a) * frac;
                let idx = frame * channels + ch;
                out.samples[idx] = (out.samples[idx] + w * level).clamp(-1.0, 1.0);
            }
        }
    }

    Ok(out)
}
