//! DemandRank Library - Core Data Pipeline for Road-Segment Demand Maps
//!
//! This library loads a partitioned series of road-segment records, derives a weighted
//! composite "demand" score for each record and narrows the loaded data down to the set
//! that should reach a map renderer for the current view. Every stage is approximate: chunks
//! are indexed by a single bounding box and the final render cap is enforced by Bernoulli
//! sampling.
//!
//! # Architecture
//!
//! - **[`ChunkStore`]**: Loaded partitions, one bounding box per [`Chunk`]
//! - **[`ScoreTable`]**: Composite scores derived from a [`WeightVector`]
//! - **[`select_active_chunks`]**: Viewport-driven working set under a zoom budget
//! - **[`FilterCriteria`]**: Score range, boolean toggles and named [`Preset`]s
//! - **[`sample_for_render`]**: Visibility-prioritized render budget sampling
//! - **[`color_for_score`]**: Deterministic score to color lookup
//! - **[`Session`]**: Application state plus the debounced [`Scheduler`]
//!
//! # Data flow
//!
//! `ChunkStore → select_active_chunks → ScoreTable → FilterCriteria → sample_for_render →
//! color_for_score → renderer`. Weight changes re-enter at scoring, viewport changes at
//! selection and filter changes at the filter stage.

mod budget;
mod chunk;
mod export;
mod filter;
mod record;
mod scoring;
mod session;
mod share;
mod source;
mod style;
pub mod utils;
mod viewport;

// Public API exports
pub use budget::sample_for_render;
pub use chunk::{Chunk, ChunkStore, LoadConfig, LoadReport};
pub use export::{describe_feature, to_csv, to_geojson};
pub use filter::{FilterCriteria, Field, Predicate, Preset, RecordKey, ScoredFeature};
pub use record::{Factor, FactorScores, FeatureRecord, Geometry, ParsedPartition, parse_partition};
pub use scoring::{ChunkScores, RecordScore, ScoreTable, WeightVector};
pub use session::{
    Config, Frame, FramePublisher, RenderedFeature, Scheduler, Session, SessionEvent, SessionInfo,
};
pub use share::SharedView;
pub use source::{CHUNK_PLACEHOLDER, DEFAULT_PATTERN, FsSource, MemorySource, PartitionSource};
#[cfg(feature = "http")]
pub use source::HttpSource;
pub use style::{BUCKETS, Bucket, Layers, Rgb, SIDEWALK_COLOR, color_for_score, split_sidewalk_layers, style_for_score};
pub use viewport::{ActiveSet, ViewportState, ZoomThreshold, budget_for_zoom, select_active_chunks};

/// Error types for the pipeline
#[derive(Debug, thiserror::Error)]
pub enum DemandError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Partition {index} failed to load: {reason}")]
    PartitionLoad { index: usize, reason: String },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid share token: {0}")]
    InvalidShareToken(String),

    #[error("No valid records were loaded")]
    NoValidRecords,

    #[error("Nothing to export")]
    NothingToExport,
}

pub type Result<T> = std::result::Result<T, DemandError>;

#[cfg(test)]
pub(crate) mod test_support {
    //! Builders shared by the module tests

    use crate::{Chunk, FactorScores, FeatureRecord, Geometry};
    use geo::Coord;

    /// A point record with uniform factor scores and no flags set
    pub fn point_record(lon: f64, lat: f64) -> FeatureRecord {
        FeatureRecord::new(Geometry::Point(Coord { x: lon, y: lat }))
            .expect("point geometry always has a position")
    }

    /// A point record with explicit factors and flags
    pub fn scored_record(
        lon: f64,
        lat: f64,
        factors: [f64; 7],
        pedestrian_feasible: bool,
        urban_context: bool,
        has_sidewalk: bool,
    ) -> FeatureRecord {
        let mut record = point_record(lon, lat);
        record.factors = FactorScores::new(factors);
        record.pedestrian_feasible = pedestrian_feasible;
        record.urban_context = urban_context;
        record.has_sidewalk = has_sidewalk;
        record
    }

    /// A chunk whose records sit on the corners of the given box
    pub fn box_chunk(index: usize, west: f64, south: f64, east: f64, north: f64, len: usize) -> Chunk {
        let mut records = vec![point_record(west, south), point_record(east, north)];
        while records.len() < len {
            records.push(point_record((west + east) / 2.0, (south + north) / 2.0));
        }
        records.truncate(len.max(2));
        Chunk::new(index, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn() -> Config = Config::default;
        let _: fn() -> WeightVector = WeightVector::default;
        let _: fn() -> FilterCriteria = FilterCriteria::default;
        let _: fn(usize, Vec<FeatureRecord>) -> Chunk = Chunk::new;
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DemandError::NoValidRecords.to_string(),
            "No valid records were loaded"
        );
        let err = DemandError::PartitionLoad {
            index: 3,
            reason: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Partition 3 failed to load: boom");
    }
}
