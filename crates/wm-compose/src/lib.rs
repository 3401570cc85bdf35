//! wm-compose: watermark timeline construction.
//!
//! [`build`] turns a pattern, the two track durations and a settings
//! snapshot into a [`Composition`] (where the watermark plays) and a
//! [`GainSpec`] (how loudly). Nothing here touches audio data; the exporter
//! in `wm-pipeline` renders the result.

pub mod composition;
pub mod gain;
pub mod pattern;

pub use composition::{Composition, Segment};
pub use gain::{GainCursor, GainRamp, GainSpec, TimeRange};
pub use pattern::{pattern_for, InsertionPattern, Timing};

use rand::RngCore;
use wm_core::{Error, PatternKind, Result, WatermarkSettings};

/// Build the timeline and gain envelope for one pair.
///
/// `rng` is only drawn from by [`PatternKind::RandomInterval`] with non-zero
/// randomness.
///
/// # Errors
///
/// - [`Error::CompositionBuildFailure`] if either duration is zero, negative
///   or not finite.
/// - [`Error::Validation`] if the settings are out of range.
pub fn build(
    pattern: PatternKind,
    primary_duration: f64,
    watermark_duration: f64,
    settings: &WatermarkSettings,
    rng: &mut dyn RngCore,
) -> Result<(Composition, GainSpec)> {
    if !(primary_duration.is_finite() && primary_duration > 0.0) {
        return Err(Error::CompositionBuildFailure(format!(
            "primary track has no length ({primary_duration}s)"
        )));
    }
    if !(watermark_duration.is_finite() && watermark_duration > 0.0) {
        return Err(Error::CompositionBuildFailure(format!(
            "watermark track has no length ({watermark_duration}s)"
        )));
    }
    settings.validate()?;

    let timing = Timing {
        primary: primary_duration,
        watermark: watermark_duration,
    };
    let imp = pattern_for(pattern);
    let starts = imp.start_times(timing, settings, rng);

    let mut composition = Composition::new(primary_duration, watermark_duration);
    for (i, &start) in starts.iter().enumerate() {
        // One watermark track: a segment is cut short where the next begins.
        let next = starts.get(i + 1).copied().unwrap_or(primary_duration);
        let duration = watermark_duration
            .min(primary_duration - start)
            .min(next - start);
        if start >= 0.0 && duration > 0.0 {
            composition
                .watermark_segments
                .push(Segment::new(start, duration));
        }
    }

    let gain = imp.envelope(&composition.watermark_segments, timing, settings);

    tracing::debug!(
        pattern = %pattern,
        primary_duration,
        watermark_duration,
        insertions = composition.insertion_count(),
        ramps = gain.len(),
        "composition built"
    );

    Ok((composition, gain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn settings(pattern: PatternKind) -> WatermarkSettings {
        WatermarkSettings {
            pattern,
            volume: 0.8,
            initial_delay_secs: 5.0,
            loop_interval_secs: 10.0,
            randomness: 0.5,
            fade_duration_secs: 1.0,
        }
    }

    fn starts(c: &Composition) -> Vec<f64> {
        c.watermark_segments.iter().map(|s| s.start).collect()
    }

    #[test]
    fn regular_interval_starts() {
        let s = settings(PatternKind::RegularInterval);
        let (c, gain) = build(PatternKind::RegularInterval, 25.0, 2.0, &s, &mut rng()).unwrap();
        assert_eq!(starts(&c), vec![5.0, 15.0]);
        assert!(c.watermark_segments.iter().all(|seg| seg.duration == 2.0));
        assert_eq!(c.primary_segments, vec![Segment::new(0.0, 25.0)]);
        assert_eq!(gain.len(), 1);
        assert_eq!(gain.volume_at(12.0), 0.8);
    }

    #[test]
    fn random_with_zero_randomness_matches_regular() {
        let mut s = settings(PatternKind::RandomInterval);
        s.randomness = 0.0;
        s.initial_delay_secs = 1.5;
        s.loop_interval_secs = 3.7;
        let (regular, _) = build(PatternKind::RegularInterval, 120.0, 1.0, &s, &mut rng()).unwrap();
        let (random, _) = build(PatternKind::RandomInterval, 120.0, 1.0, &s, &mut rng()).unwrap();
        assert_eq!(starts(&regular), starts(&random));
    }

    #[test]
    fn random_is_reproducible_with_same_seed() {
        let s = settings(PatternKind::RandomInterval);
        let (a, _) = build(PatternKind::RandomInterval, 300.0, 2.0, &s, &mut rng()).unwrap();
        let (b, _) = build(PatternKind::RandomInterval, 300.0, 2.0, &s, &mut rng()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn shared_timing_across_looping_patterns() {
        let s = settings(PatternKind::RegularInterval);
        let (regular, _) = build(PatternKind::RegularInterval, 95.0, 3.0, &s, &mut rng()).unwrap();
        for kind in [PatternKind::FadeInOut, PatternKind::VaryingVolume] {
            let (c, _) = build(kind, 95.0, 3.0, &s, &mut rng()).unwrap();
            assert_eq!(starts(&c), starts(&regular), "{kind}");
        }
    }

    #[test]
    fn fade_in_out_envelope() {
        let mut s = settings(PatternKind::FadeInOut);
        s.initial_delay_secs = 10.0;
        s.loop_interval_secs = 0.0;
        let (c, gain) = build(PatternKind::FadeInOut, 30.0, 4.0, &s, &mut rng()).unwrap();
        assert_eq!(c.watermark_segments, vec![Segment::new(10.0, 4.0)]);

        assert_eq!(gain.volume_at(10.0), 0.0);
        assert!((gain.volume_at(11.0) - 0.8).abs() < 1e-12);
        assert!((gain.volume_at(13.0) - 0.8).abs() < 1e-12);
        assert_eq!(gain.volume_at(14.0), 0.0);
        assert!((gain.volume_at(10.5) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn fade_clipped_to_half_segment() {
        let mut s = settings(PatternKind::FadeInOut);
        s.initial_delay_secs = 0.0;
        s.loop_interval_secs = 0.0;
        s.fade_duration_secs = 5.0;
        let (_, gain) = build(PatternKind::FadeInOut, 30.0, 2.0, &s, &mut rng()).unwrap();
        // Up over [0,1], down over [1,2], no hold.
        assert_eq!(gain.len(), 2);
        assert!((gain.volume_at(1.0) - 0.8).abs() < 1e-12);
        assert_eq!(gain.volume_at(2.0), 0.0);
    }

    #[test]
    fn varying_volume_levels_follow_insertion_index() {
        let s = settings(PatternKind::VaryingVolume);
        let (c, gain) = build(PatternKind::VaryingVolume, 45.0, 2.0, &s, &mut rng()).unwrap();
        assert_eq!(starts(&c), vec![5.0, 15.0, 25.0, 35.0]);
        for (i, seg) in c.watermark_segments.iter().enumerate() {
            let expected = 0.8 * (0.7 + 0.3 * (i as f64 * 0.7).sin());
            assert!((gain.volume_at(seg.start + 0.5) - expected).abs() < 1e-12);
            assert!(expected >= 0.4 * 0.8 && expected <= 0.8);
        }
        // Held between insertions, up to the end of the primary.
        let last = 0.8 * (0.7 + 0.3 * (3.0f64 * 0.7).sin());
        assert!((gain.volume_at(44.0) - last).abs() < 1e-12);
    }

    #[test]
    fn single_patterns() {
        let s = settings(PatternKind::SingleAtStart);
        let (c, _) = build(PatternKind::SingleAtStart, 20.0, 3.0, &s, &mut rng()).unwrap();
        assert_eq!(c.watermark_segments, vec![Segment::new(0.0, 3.0)]);

        let (c, _) = build(PatternKind::SingleAtEnd, 20.0, 3.0, &s, &mut rng()).unwrap();
        assert_eq!(c.watermark_segments, vec![Segment::new(17.0, 3.0)]);

        // Watermark longer than the primary: clipped at both ends.
        let (c, _) = build(PatternKind::SingleAtEnd, 2.0, 3.0, &s, &mut rng()).unwrap();
        assert_eq!(c.watermark_segments, vec![Segment::new(0.0, 2.0)]);
        let (c, _) = build(PatternKind::SingleAtStart, 2.0, 3.0, &s, &mut rng()).unwrap();
        assert_eq!(c.watermark_segments, vec![Segment::new(0.0, 2.0)]);
    }

    #[test]
    fn last_segment_clipped_to_primary_end() {
        let s = settings(PatternKind::RegularInterval);
        let (c, _) = build(PatternKind::RegularInterval, 16.0, 4.0, &s, &mut rng()).unwrap();
        assert_eq!(c.watermark_segments.last().unwrap().end(), 16.0);
    }

    #[test]
    fn overlapping_insertions_are_trimmed() {
        let mut s = settings(PatternKind::RegularInterval);
        s.loop_interval_secs = 2.0;
        let (c, _) = build(PatternKind::RegularInterval, 20.0, 5.0, &s, &mut rng()).unwrap();
        assert!(c.is_well_formed());
        assert!(c.watermark_segments.iter().all(|seg| seg.duration <= 2.0));
    }

    #[test]
    fn every_pattern_stays_within_bounds() {
        let durations = [(0.5, 3.0), (7.3, 2.2), (61.0, 4.5), (600.0, 11.0)];
        for kind in PatternKind::ALL {
            for randomness in [0.0, 0.3, 1.0] {
                for &(primary, watermark) in &durations {
                    let mut s = settings(kind);
                    s.randomness = randomness;
                    s.loop_interval_secs = 3.0;
                    let (c, gain) = build(kind, primary, watermark, &s, &mut rng()).unwrap();
                    assert!(c.is_well_formed(), "{kind} {primary} {watermark}: {c:?}");
                    for ramp in &gain.ramps {
                        assert!((0.0..=1.0).contains(&ramp.start_volume));
                        assert!((0.0..=1.0).contains(&ramp.end_volume));
                        assert!(ramp.range.start >= 0.0);
                        assert!(ramp.range.end <= primary + 1e-9);
                    }
                    for w in gain.ramps.windows(2) {
                        assert!(w[0].range.end <= w[1].range.start + 1e-9);
                    }
                }
            }
        }
    }

    #[test]
    fn delay_beyond_primary_means_no_insertions() {
        let mut s = settings(PatternKind::RegularInterval);
        s.initial_delay_secs = 100.0;
        let (c, _) = build(PatternKind::RegularInterval, 30.0, 2.0, &s, &mut rng()).unwrap();
        assert_eq!(c.insertion_count(), 0);
    }

    #[test]
    fn zero_length_tracks_fail() {
        let s = settings(PatternKind::RegularInterval);
        let err = build(PatternKind::RegularInterval, 0.0, 2.0, &s, &mut rng()).unwrap_err();
        assert!(matches!(err, Error::CompositionBuildFailure(_)));
        let err = build(PatternKind::RegularInterval, 10.0, f64::NAN, &s, &mut rng()).unwrap_err();
        assert!(matches!(err, Error::CompositionBuildFailure(_)));
    }

    #[test]
    fn invalid_settings_rejected() {
        let mut s = settings(PatternKind::RegularInterval);
        s.volume = 1.5;
        let err = build(PatternKind::RegularInterval, 10.0, 2.0, &s, &mut rng()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn plan_serializes_to_json() {
        let s = settings(PatternKind::FadeInOut);
        let (c, gain) = build(PatternKind::FadeInOut, 25.0, 2.0, &s, &mut rng()).unwrap();
        let json = serde_json::to_value((&c, &gain)).unwrap();
        assert_eq!(json[0]["watermark_segments"][0]["start"], 5.0);
        assert!(json[1]["ramps"].as_array().unwrap().len() >= 2);
    }
}
