//! Score to color mapping
//!
//! A fixed descending list of buckets; the first bucket whose minimum the score reaches
//! wins. Scores below every minimum, including NaN, fall into the lowest bucket.

use crate::ScoredFeature;
use std::fmt;

/// An sRGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Lowercase `#rrggbb` form
    pub fn hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// One legend entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    /// Inclusive lower bound; the last bucket catches everything below the others
    pub min: f64,
    pub color: Rgb,
    pub label: &'static str,
}

/// Legend buckets, highest first
pub const BUCKETS: [Bucket; 7] = [
    Bucket { min: 70.0, color: Rgb::new(0x7f, 0x00, 0x00), label: "Very High" },
    Bucket { min: 60.0, color: Rgb::new(0xb7, 0x1c, 0x1c), label: "High" },
    Bucket { min: 50.0, color: Rgb::new(0xd3, 0x2f, 0x2f), label: "Medium-High" },
    Bucket { min: 40.0, color: Rgb::new(0xe5, 0x39, 0x35), label: "Medium" },
    Bucket { min: 30.0, color: Rgb::new(0xf4, 0x43, 0x36), label: "Medium-Low" },
    Bucket { min: 20.0, color: Rgb::new(0xef, 0x53, 0x50), label: "Low" },
    Bucket { min: f64::NEG_INFINITY, color: Rgb::new(0xff, 0xcd, 0xd2), label: "Very Low" },
];

/// Color of segments that already have a sidewalk
pub const SIDEWALK_COLOR: Rgb = Rgb::new(0x4c, 0xaf, 0x50);

/// Bucket for a composite score
pub fn style_for_score(score: f64) -> &'static Bucket {
    BUCKETS
        .iter()
        .find(|bucket| score >= bucket.min)
        .unwrap_or(&BUCKETS[BUCKETS.len() - 1])
}

#[inline]
pub fn color_for_score(score: f64) -> Rgb {
    style_for_score(score).color
}

/// Rendered records split by whether they have a sidewalk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layers<'a> {
    pub roads: Vec<ScoredFeature<'a>>,
    pub sidewalks: Vec<ScoredFeature<'a>>,
}

/// Split into a road layer and a sidewalk layer
///
/// With `highlight` off every record stays in the road layer.
pub fn split_sidewalk_layers<'a>(features: Vec<ScoredFeature<'a>>, highlight: bool) -> Layers<'a> {
    if !highlight {
        return Layers {
            roads: features,
            sidewalks: Vec::new(),
        };
    }
    let (sidewalks, roads) = features
        .into_iter()
        .partition(|feature| feature.record.has_sidewalk);
    Layers { roads, sidewalks }
}
