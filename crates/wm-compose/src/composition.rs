//! Two-track timeline: the primary track once, full length, and the
//! watermark track at each insertion point.

use serde::{Deserialize, Serialize};

/// A source range placed on the destination timeline.
///
/// The source always starts at its own zero, so `duration` is also how much
/// of the source is used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub duration: f64,
}

impl Segment {
    pub fn new(start: f64, duration: f64) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub primary_duration: f64,
    pub watermark_duration: f64,
    pub primary_segments: Vec<Segment>,
    /// Insertion segments in temporal order, never overlapping.
    pub watermark_segments: Vec<Segment>,
}

impl Composition {
    /// Composition carrying the full primary track and no insertions yet.
    pub fn new(primary_duration: f64, watermark_duration: f64) -> Self {
        Self {
            primary_duration,
            watermark_duration,
            primary_segments: vec![Segment::new(0.0, primary_duration)],
            watermark_segments: Vec::new(),
        }
    }

    pub fn insertion_count(&self) -> usize {
        self.watermark_segments.len()
    }

    /// Length of the rendered result.
    pub fn duration(&self) -> f64 {
        self.primary_duration
    }

    /// Whether every insertion lies inside the primary track and insertions
    /// are ordered without overlap.
    pub fn is_well_formed(&self) -> bool {
        let bounded = self.watermark_segments.iter().all(|s| {
            s.start >= 0.0 && s.duration > 0.0 && s.end() <= self.primary_duration + 1e-9
        });
        let ordered = self
            .watermark_segments
            .windows(2)
            .all(|w| w[0].end() <= w[1].start + 1e-9);
        bounded && ordered
    }
}
