//! Gain automation for the watermark track.

use serde::{Deserialize, Serialize};

/// Closed time interval in seconds on the destination timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Linear volume change across a time range. A step is a ramp whose start
/// and end volumes are equal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainRamp {
    pub range: TimeRange,
    pub start_volume: f64,
    pub end_volume: f64,
}

impl GainRamp {
    pub fn volume_at(&self, t: f64) -> f64 {
        let len = self.range.duration();
        if len <= 0.0 {
            return self.end_volume;
        }
        let frac = ((t - self.range.start) / len).clamp(0.0, 1.0);
        self.start_volume + (self.end_volume - self.start_volume) * frac
    }
}

/// Ordered, non-overlapping ramps covering the watermark track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GainSpec {
    pub ramps: Vec<GainRamp>,
}

impl GainSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a ramp, clamping volumes to `[0, 1]`. Empty ranges are dropped.
    pub fn push(&mut self, start: f64, end: f64, start_volume: f64, end_volume: f64) {
        if !(end > start) {
            return;
        }
        self.ramps.push(GainRamp {
            range: TimeRange::new(start, end),
            start_volume: start_volume.clamp(0.0, 1.0),
            end_volume: end_volume.clamp(0.0, 1.0),
        });
    }

    /// Flat level across `[start, end]`.
    pub fn push_level(&mut self, start: f64, end: f64, volume: f64) {
        self.push(start, end, volume, volume);
    }

    pub fn is_empty(&self) -> bool {
        self.ramps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ramps.len()
    }

    /// Watermark volume at time `t`.
    ///
    /// Ranges are evaluated half-open, except that the end point of a ramp
    /// not followed by another ramp takes that ramp's end volume. Times
    /// outside every ramp are silent.
    pub fn volume_at(&self, t: f64) -> f64 {
        let mut closing = None;
        for ramp in &self.ramps {
            if t >= ramp.range.start && t < ramp.range.end {
                return ramp.volume_at(t);
            }
            if t == ramp.range.end {
                closing = Some(ramp.end_volume);
            }
        }
        closing.unwrap_or(0.0)
    }

    /// Reader for sweeping the envelope forward in time, as a renderer does
    /// frame by frame.
    pub fn cursor(&self) -> GainCursor<'_> {
        GainCursor {
            ramps: &self.ramps,
            next: 0,
        }
    }
}

/// Forward-only view of a [`GainSpec`].
///
/// Gives the same answer as [`GainSpec::volume_at`] as long as the times
/// it is asked about never decrease. Ramps that ended before the last query
/// are skipped for good, so a full sweep costs one pass over the ramps.
#[derive(Debug, Clone)]
pub struct GainCursor<'a> {
    ramps: &'a [GainRamp],
    next: usize,
}

impl GainCursor<'_> {
    pub fn volume_at(&mut self, t: f64) -> f64 {
        while self.next < self.ramps.len() && self.ramps[self.next].range.end < t {
            self.next += 1;
        }
        let mut closing = None;
        for ramp in &self.ramps[self.next..] {
            if ramp.range.start > t {
                break;
            }
            if t < ramp.range.end {
                return ramp.volume_at(t);
            }
            closing = Some(ramp.end_volume);
        }
        closing.unwrap_or(0.0)
    }
}
