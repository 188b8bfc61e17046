//! Filter pipeline
//!
//! Narrows the active records with four conjunctive stages, in order: geometric
//! validity, inclusive score range, optional boolean toggles and at most one named
//! preset. Presets are fixed conjunctions of field comparisons evaluated structurally;
//! there is no user-authored query syntax.
//!
//! Filtering is pure and order-preserving, so applying the same criteria to its own
//! output returns that output unchanged.

use crate::FeatureRecord;
use crate::utils::is_valid_lon_lat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a record by its chunk's store slot and its position inside the chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Store slot of the owning chunk
    pub slot: usize,
    /// Position of the record inside its chunk
    pub offset: usize,
}

/// A record together with its current scores
#[derive(Debug, Clone, Copy)]
pub struct ScoredFeature<'a> {
    pub key: RecordKey,
    pub record: &'a FeatureRecord,
    /// Current composite score; NaN when the record was never scored
    pub composite: f64,
    pub original: Option<f64>,
}

impl PartialEq for ScoredFeature<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && std::ptr::eq(self.record, other.record)
            && self.composite.to_bits() == other.composite.to_bits()
            && self.original.map(f64::to_bits) == other.original.map(f64::to_bits)
    }
}

/// Record fields that preset clauses can compare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    CompositeScore,
    CrashRisk,
    /// 1 when the segment has a sidewalk, else 0
    Sidewalk,
    /// 1 when the segment is pedestrian feasible, else 0
    PedestrianFeasible,
}

impl Field {
    fn value(self, feature: &ScoredFeature<'_>) -> f64 {
        let flag = |set: bool| if set { 1.0 } else { 0.0 };
        match self {
            Self::CompositeScore => feature.composite,
            Self::CrashRisk => feature.record.factors.get(crate::Factor::Crash),
            Self::Sidewalk => flag(feature.record.has_sidewalk),
            Self::PedestrianFeasible => flag(feature.record.pedestrian_feasible),
        }
    }
}

/// Structural predicate over a scored record
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    ScoreAtLeast(f64),
    FieldEquals(Field, f64),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn evaluate(&self, feature: &ScoredFeature<'_>) -> bool {
        match self {
            Self::ScoreAtLeast(threshold) => feature.composite >= *threshold,
            Self::FieldEquals(field, value) => field.value(feature) == *value,
            Self::And(clauses) => clauses.iter().all(|clause| clause.evaluate(feature)),
        }
    }
}

/// Named one-click filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// High demand, worst crash risk, no sidewalk, pedestrian feasible
    HighPriorityGaps,
    /// Worst crash risk where walking is feasible
    CrashHotspots,
    /// Medium or higher demand without a sidewalk where walking is feasible
    MissingSidewalks,
}

impl Preset {
    pub const ALL: [Preset; 3] = [
        Preset::HighPriorityGaps,
        Preset::CrashHotspots,
        Preset::MissingSidewalks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::HighPriorityGaps => "high-priority-gaps",
            Self::CrashHotspots => "crash-hotspots",
            Self::MissingSidewalks => "missing-sidewalks",
        }
    }

    /// The fixed conjunction this preset stands for
    pub fn predicate(self) -> Predicate {
        match self {
            Self::HighPriorityGaps => Predicate::And(vec![
                Predicate::ScoreAtLeast(50.0),
                Predicate::FieldEquals(Field::CrashRisk, 10.0),
                Predicate::FieldEquals(Field::Sidewalk, 0.0),
                Predicate::FieldEquals(Field::PedestrianFeasible, 1.0),
            ]),
            Self::CrashHotspots => Predicate::And(vec![
                Predicate::FieldEquals(Field::CrashRisk, 10.0),
                Predicate::FieldEquals(Field::PedestrianFeasible, 1.0),
            ]),
            Self::MissingSidewalks => Predicate::And(vec![
                Predicate::ScoreAtLeast(40.0),
                Predicate::FieldEquals(Field::Sidewalk, 0.0),
                Predicate::FieldEquals(Field::PedestrianFeasible, 1.0),
            ]),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|p| p.name()).collect();
                format!("unknown preset '{s}', expected one of {}", names.join(", "))
            })
    }
}

/// Current filter settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterCriteria {
    /// Inclusive lower bound of the composite score
    pub min_score: f64,
    /// Inclusive upper bound of the composite score
    pub max_score: f64,
    /// Keep only pedestrian-feasible records
    pub pedestrian_feasible_only: bool,
    /// Keep only records in an urban context
    pub urban_only: bool,
    /// Render records with an existing sidewalk in their own layer
    pub highlight_sidewalks: bool,
    pub preset: Option<Preset>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_score: 100.0,
            pedestrian_feasible_only: false,
            urban_only: false,
            highlight_sidewalks: false,
            preset: None,
        }
    }
}

impl FilterCriteria {
    /// Set the lower bound, raising the upper bound if it would fall below it
    pub fn set_min_score(&mut self, min: f64) {
        self.min_score = min;
        if self.max_score < min {
            self.max_score = min;
        }
    }

    /// Set the upper bound, lowering the lower bound if it would rise above it
    pub fn set_max_score(&mut self, max: f64) {
        self.max_score = max;
        if self.min_score > max {
            self.min_score = max;
        }
    }

    /// Whether a record passes every stage
    pub fn matches(&self, feature: &ScoredFeature<'_>) -> bool {
        if !is_valid_lon_lat(feature.record.position) {
            return false;
        }
        if !(self.min_score <= feature.composite && feature.composite <= self.max_score) {
            return false;
        }
        if self.pedestrian_feasible_only && !feature.record.pedestrian_feasible {
            return false;
        }
        if self.urban_only && !feature.record.urban_context {
            return false;
        }
        match self.preset {
            Some(preset) => preset.predicate().evaluate(feature),
            None => true,
        }
    }

    /// Keep the records that pass every stage, preserving order
    pub fn apply<'a, I>(&self, features: I) -> Vec<ScoredFeature<'a>>
    where
        I: IntoIterator<Item = ScoredFeature<'a>>,
    {
        #[cfg(feature = "profiling")]
        profiling::scope!("filter::apply");

        let predicate = self.preset.map(Preset::predicate);
        let criteria = FilterCriteria {
            preset: None,
            ..*self
        };
        features
            .into_iter()
            .filter(|feature| {
                criteria.matches(feature)
                    && predicate.as_ref().is_none_or(|p| p.evaluate(feature))
            })
            .collect()
    }
}
