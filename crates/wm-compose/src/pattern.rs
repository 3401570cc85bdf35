//! Insertion patterns.
//!
//! Every [`PatternKind`] maps to one [`InsertionPattern`] implementation via
//! [`pattern_for`]. A pattern chooses insertion start times and the gain
//! envelope applied to the resulting segments. RegularInterval, FadeInOut
//! and VaryingVolume share [`interval_starts`]; RandomInterval uses the same
//! loop with a jittered step.

use rand::{Rng, RngCore};

use wm_core::{PatternKind, WatermarkSettings};

use crate::composition::Segment;
use crate::gain::GainSpec;

/// Upper bound on insertions per track.
pub const MAX_INSERTIONS: usize = 10_000;

/// Smallest jitter factor applied to the loop interval, so the sequence
/// always advances.
pub const MIN_STEP_FACTOR: f64 = 0.1;

/// Durations a pattern works against, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub primary: f64,
    pub watermark: f64,
}

pub trait InsertionPattern: Send + Sync {
    fn kind(&self) -> PatternKind;

    /// Insertion start times in ascending order, each in `[0, primary)`.
    fn start_times(
        &self,
        timing: Timing,
        settings: &WatermarkSettings,
        rng: &mut dyn RngCore,
    ) -> Vec<f64>;

    /// Gain envelope for the watermark track. Defaults to the settings
    /// volume across the whole primary duration.
    fn envelope(&self, _segments: &[Segment], timing: Timing, settings: &WatermarkSettings) -> GainSpec {
        let mut spec = GainSpec::new();
        spec.push_level(0.0, timing.primary, settings.volume);
        spec
    }
}

/// Start times `t0 = delay, t(n+1) = t(n) + interval * step()` while below
/// `primary`. A non-positive interval yields the single start `delay`.
pub fn interval_starts(
    delay: f64,
    interval: f64,
    primary: f64,
    mut step: impl FnMut() -> f64,
) -> Vec<f64> {
    let delay = delay.max(0.0);
    if !(delay < primary) {
        return Vec::new();
    }
    if !(interval > 0.0) {
        return vec![delay];
    }

    let mut starts = Vec::new();
    let mut t = delay;
    while t < primary && starts.len() < MAX_INSERTIONS {
        starts.push(t);
        t += interval * step();
    }
    starts
}

fn regular_starts(timing: Timing, settings: &WatermarkSettings) -> Vec<f64> {
    interval_starts(
        settings.initial_delay_secs,
        settings.loop_interval_secs,
        timing.primary,
        || 1.0,
    )
}

struct SingleAtStart;
struct SingleAtEnd;
struct RegularInterval;
struct RandomInterval;
struct FadeInOut;
struct VaryingVolume;

impl InsertionPattern for SingleAtStart {
    fn kind(&self) -> PatternKind {
        PatternKind::SingleAtStart
    }

    fn start_times(&self, _: Timing, _: &WatermarkSettings, _: &mut dyn RngCore) -> Vec<f64> {
        vec![0.0]
    }
}

impl InsertionPattern for SingleAtEnd {
    fn kind(&self) -> PatternKind {
        PatternKind::SingleAtEnd
    }

    fn start_times(&self, timing: Timing, _: &WatermarkSettings, _: &mut dyn RngCore) -> Vec<f64> {
        vec![(timing.primary - timing.watermark).max(0.0)]
    }
}

impl InsertionPattern for RegularInterval {
    fn kind(&self) -> PatternKind {
        PatternKind::RegularInterval
    }

    fn start_times(
        &self,
        timing: Timing,
        settings: &WatermarkSettings,
        _: &mut dyn RngCore,
    ) -> Vec<f64> {
        regular_starts(timing, settings)
    }
}

impl InsertionPattern for RandomInterval {
    fn kind(&self) -> PatternKind {
        PatternKind::RandomInterval
    }

    fn start_times(
        &self,
        timing: Timing,
        settings: &WatermarkSettings,
        rng: &mut dyn RngCore,
    ) -> Vec<f64> {
        let r = settings.randomness.clamp(0.0, 1.0);
        interval_starts(
            settings.initial_delay_secs,
            settings.loop_interval_secs,
            timing.primary,
            || {
                if r == 0.0 {
                    1.0
                } else {
                    rng.gen_range((1.0 - r)..=(1.0 + r)).max(MIN_STEP_FACTOR)
                }
            },
        )
    }
}

impl InsertionPattern for FadeInOut {
    fn kind(&self) -> PatternKind {
        PatternKind::FadeInOut
    }

    fn start_times(
        &self,
        timing: Timing,
        settings: &WatermarkSettings,
        _: &mut dyn RngCore,
    ) -> Vec<f64> {
        regular_starts(timing, settings)
    }

    /// Per segment `[s, e)`: ramp up over `[s, s+f]`, hold, ramp down over
    /// `[e-f, e]`, with `f` at most half the segment.
    fn envelope(&self, segments: &[Segment], _: Timing, settings: &WatermarkSettings) -> GainSpec {
        let volume = settings.volume;
        let mut spec = GainSpec::new();
        for seg in segments {
            let (s, e) = (seg.start, seg.end());
            let fade = settings.fade_duration_secs.max(0.0).min(seg.duration / 2.0);
            spec.push(s, s + fade, 0.0, volume);
            spec.push_level(s + fade, e - fade, volume);
            spec.push(e - fade, e, volume, 0.0);
        }
        spec
    }
}

impl InsertionPattern for VaryingVolume {
    fn kind(&self) -> PatternKind {
        PatternKind::VaryingVolume
    }

    fn start_times(
        &self,
        timing: Timing,
        settings: &WatermarkSettings,
        _: &mut dyn RngCore,
    ) -> Vec<f64> {
        regular_starts(timing, settings)
    }

    /// Level for insertion `i` held from its start to the next start (the
    /// last one to the end of the primary track).
    fn envelope(&self, segments: &[Segment], timing: Timing, settings: &WatermarkSettings) -> GainSpec {
        let mut spec = GainSpec::new();
        for (i, seg) in segments.iter().enumerate() {
            let until = segments
                .get(i + 1)
                .map(|next| next.start)
                .unwrap_or(timing.primary);
            spec.push_level(seg.start, until, varying_level(settings.volume, i));
        }
        spec
    }
}

/// `volume * (0.7 + 0.3 * sin(0.7 i))`, always within `[0.4, 1] * volume`.
pub fn varying_level(volume: f64, index: usize) -> f64 {
    volume * (0.7 + 0.3 * (index as f64 * 0.7).sin())
}

static SINGLE_AT_START: SingleAtStart = SingleAtStart;
static SINGLE_AT_END: SingleAtEnd = SingleAtEnd;
static REGULAR_INTERVAL: RegularInterval = RegularInterval;
static RANDOM_INTERVAL: RandomInterval = RandomInterval;
static FADE_IN_OUT: FadeInOut = FadeInOut;
static VARYING_VOLUME: VaryingVolume = VaryingVolume;

/// Implementation for a pattern kind.
pub fn pattern_for(kind: PatternKind) -> &'static dyn InsertionPattern {
    match kind {
        PatternKind::SingleAtStart => &SINGLE_AT_START,
        PatternKind::SingleAtEnd => &SINGLE_AT_END,
        PatternKind::RegularInterval => &REGULAR_INTERVAL,
        PatternKind::RandomInterval => &RANDOM_INTERVAL,
        PatternKind::FadeInOut => &FADE_IN_OUT,
        PatternKind::VaryingVolume => &VARYING_VOLUME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings(delay: f64, interval: f64) -> WatermarkSettings {
        WatermarkSettings {
            initial_delay_secs: delay,
            loop_interval_secs: interval,
            ..Default::default()
        }
    }

    #[test]
    fn dispatch_table_covers_every_kind() {
        for kind in PatternKind::ALL {
            assert_eq!(pattern_for(kind).kind(), kind);
        }
    }

    #[test]
    fn interval_starts_exclude_primary_end() {
        assert_eq!(interval_starts(5.0, 10.0, 25.0, || 1.0), vec![5.0, 15.0]);
        assert_eq!(interval_starts(0.0, 10.0, 30.0, || 1.0), vec![0.0, 10.0, 20.0]);
    }

    #[test]
    fn zero_interval_is_single_insertion() {
        assert_eq!(interval_starts(3.0, 0.0, 25.0, || 1.0), vec![3.0]);
    }

    #[test]
    fn delay_past_end_yields_nothing() {
        assert!(interval_starts(25.0, 10.0, 25.0, || 1.0).is_empty());
        assert!(interval_starts(40.0, 0.0, 25.0, || 1.0).is_empty());
    }

    #[test]
    fn tiny_interval_is_capped() {
        let starts = interval_starts(0.0, 1e-9, 100.0, || 1.0);
        assert_eq!(starts.len(), MAX_INSERTIONS);
    }

    #[test]
    fn random_interval_stays_within_jitter_bounds() {
        let mut s = settings(0.0, 10.0);
        s.randomness = 0.5;
        let timing = Timing {
            primary: 1000.0,
            watermark: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let starts = pattern_for(PatternKind::RandomInterval).start_times(timing, &s, &mut rng);
        assert!(starts.len() > 1);
        for w in starts.windows(2) {
            let gap = w[1] - w[0];
            assert!((5.0 - 1e-9..=15.0 + 1e-9).contains(&gap), "gap {gap}");
        }
    }

    #[test]
    fn full_randomness_still_advances() {
        let mut s = settings(0.0, 10.0);
        s.randomness = 1.0;
        let timing = Timing {
            primary: 500.0,
            watermark: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(99);
        let starts = pattern_for(PatternKind::RandomInterval).start_times(timing, &s, &mut rng);
        assert!(starts.windows(2).all(|w| w[1] - w[0] >= 10.0 * MIN_STEP_FACTOR - 1e-9));
    }

    #[test]
    fn varying_level_bounds() {
        for i in 0..200 {
            let level = varying_level(0.5, i);
            assert!(level >= 0.4 * 0.5 - 1e-12 && level <= 0.5 + 1e-12, "i={i} level={level}");
        }
        assert!((varying_level(1.0, 0) - 0.7).abs() < 1e-12);
    }
}
