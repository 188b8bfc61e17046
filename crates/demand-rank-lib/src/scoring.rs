//! Scoring engine
//!
//! The composite score of a record is the raw weighted sum of its seven factor scores.
//! Weights are not normalized; a vector that does not sum to one is only reported
//! through [`WeightVector::is_balanced`].
//!
//! Scores are kept in a [`ScoreTable`] aligned with the chunk store instead of on the
//! records themselves, so records stay immutable and shareable.

use crate::{ChunkStore, Factor, FeatureRecord};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Tolerance used when checking whether weights sum to one
pub const BALANCE_TOLERANCE: f64 = 0.01;

/// A weight in [0, 1] for each factor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightVector {
    pub census: f64,
    pub crash: f64,
    pub func_class: f64,
    pub school: f64,
    pub trail: f64,
    pub rail: f64,
    pub bus: f64,
}

impl Default for WeightVector {
    fn default() -> Self {
        Self {
            census: 0.20,
            crash: 0.20,
            func_class: 0.20,
            school: 0.10,
            trail: 0.10,
            rail: 0.10,
            bus: 0.10,
        }
    }
}

impl WeightVector {
    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Census => self.census,
            Factor::Crash => self.crash,
            Factor::FuncClass => self.func_class,
            Factor::School => self.school,
            Factor::Trail => self.trail,
            Factor::Rail => self.rail,
            Factor::Bus => self.bus,
        }
    }

    /// Set a weight, clamped to [0, 1]
    pub fn set(&mut self, factor: Factor, weight: f64) {
        let weight = if weight.is_nan() { 0.0 } else { weight.clamp(0.0, 1.0) };
        let slot = match factor {
            Factor::Census => &mut self.census,
            Factor::Crash => &mut self.crash,
            Factor::FuncClass => &mut self.func_class,
            Factor::School => &mut self.school,
            Factor::Trail => &mut self.trail,
            Factor::Rail => &mut self.rail,
            Factor::Bus => &mut self.bus,
        };
        *slot = weight;
    }

    /// Sum of all weights; informational only
    pub fn total(&self) -> f64 {
        Factor::ALL.into_iter().map(|factor| self.get(factor)).sum()
    }

    /// Whether the weights sum to one within [`BALANCE_TOLERANCE`]
    pub fn is_balanced(&self) -> bool {
        (self.total() - 1.0).abs() <= BALANCE_TOLERANCE
    }

    /// Weighted sum of a record's factor scores
    #[inline]
    pub fn composite(&self, record: &FeatureRecord) -> f64 {
        record
            .factors
            .iter()
            .map(|(factor, score)| self.get(factor) * score)
            .sum()
    }
}

/// Scores of a single record
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecordScore {
    /// Current composite score; before the first recompute this is the loaded value
    pub composite: Option<f64>,
    /// First composite value the record ever had; never changes once set
    pub original: Option<f64>,
}

/// Scores of every record in one chunk, in record order
#[derive(Debug, Clone, Default)]
pub struct ChunkScores {
    scores: Vec<RecordScore>,
}

impl ChunkScores {
    fn seeded(records: &[FeatureRecord]) -> Self {
        Self {
            scores: records
                .iter()
                .map(|record| RecordScore {
                    composite: record.demand,
                    original: None,
                })
                .collect(),
        }
    }

    fn recompute(&mut self, weights: &WeightVector, records: &[FeatureRecord]) {
        for (score, record) in self.scores.iter_mut().zip(records) {
            let next = weights.composite(record);
            if score.original.is_none() {
                score.original = Some(score.composite.unwrap_or(next));
            }
            score.composite = Some(next);
        }
    }

    #[inline]
    pub fn get(&self, offset: usize) -> Option<&RecordScore> {
        self.scores.get(offset)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Composite scores for every loaded record, aligned slot-for-slot with a [`ChunkStore`]
#[derive(Debug, Clone, Default)]
pub struct ScoreTable {
    chunks: Vec<ChunkScores>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ScoreTable {
    /// Table holding the loaded composite values, nothing scored yet
    pub fn seeded(store: &ChunkStore) -> Self {
        Self {
            chunks: store
                .chunks()
                .iter()
                .map(|chunk| ChunkScores::seeded(chunk.records()))
                .collect(),
        }
    }

    /// Recompute the composite score of every loaded record
    ///
    /// This visits all records, not just the active ones, so any chunk that later comes
    /// into view already carries scores for the current weights. A record scored for
    /// the first time keeps its previous value as its original score.
    pub fn recompute(&mut self, weights: &WeightVector, store: &ChunkStore) {
        #[cfg(feature = "profiling")]
        profiling::scope!("scoring::recompute");

        debug_assert_eq!(self.chunks.len(), store.len());
        self.chunks
            .par_iter_mut()
            .zip(store.chunks().par_iter())
            .for_each(|(scores, chunk)| scores.recompute(weights, chunk.records()));

        tracing::debug!(
            "Recomputed scores for {} records (total weight {:.2})",
            store.total_records(),
            weights.total()
        );
    }

    /// Scores of the chunk in store slot `slot`
    #[inline]
    pub fn chunk(&self, slot: usize) -> Option<&ChunkScores> {
        self.chunks.get(slot)
    }

    /// Score of record `offset` in store slot `slot`
    #[inline]
    pub fn get(&self, slot: usize, offset: usize) -> Option<&RecordScore> {
        self.chunks.get(slot)?.get(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scored_record;
    use crate::Chunk;

    fn store_with(records: Vec<FeatureRecord>) -> ChunkStore {
        let mut store = ChunkStore::new();
        store.push(Chunk::new(0, records));
        store
    }

    #[test]
    fn test_default_weights_are_balanced() {
        let weights = WeightVector::default();
        assert!((weights.total() - 1.0).abs() < 1e-12);
        assert!(weights.is_balanced());
    }

    #[test]
    fn test_unbalanced_weights_are_allowed() {
        let mut weights = WeightVector::default();
        weights.set(Factor::Census, 0.9);
        assert!(!weights.is_balanced());
        assert!((weights.total() - 1.7).abs() < 1e-12);
    }

    #[test]
    fn test_set_clamps() {
        let mut weights = WeightVector::default();
        weights.set(Factor::Bus, 3.0);
        weights.set(Factor::Rail, -1.0);
        assert_eq!(weights.get(Factor::Bus), 1.0);
        assert_eq!(weights.get(Factor::Rail), 0.0);
    }

    #[test]
    fn test_composite_worked_example() {
        let record = scored_record(
            0.0,
            0.0,
            [10.0, 10.0, 7.0, 10.0, 7.0, 7.0, 10.0],
            true,
            true,
            false,
        );
        let composite = WeightVector::default().composite(&record);
        assert!((composite - 8.4).abs() < 1e-9);
    }

    #[test]
    fn test_composite_matches_weighted_sum() {
        let factors = [
            [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            [10.0, 0.5, 7.25, 1.0, 9.0, 3.5, 2.0],
            [100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0],
        ];
        let weight_sets = [
            WeightVector::default(),
            WeightVector {
                census: 1.0,
                crash: 0.0,
                func_class: 0.33,
                school: 0.5,
                trail: 0.25,
                rail: 0.75,
                bus: 0.1,
            },
        ];
        for weights in weight_sets {
            for values in factors {
                let record = scored_record(0.0, 0.0, values, false, false, false);
                let expected: f64 = Factor::ALL
                    .iter()
                    .map(|f| weights.get(*f) * values[f.index()])
                    .sum();
                assert!((weights.composite(&record) - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_original_set_once_from_loaded_value() {
        let mut record = scored_record(0.0, 0.0, [10.0; 7], false, false, false);
        record.demand = Some(42.0);
        let store = store_with(vec![record]);
        let mut table = ScoreTable::seeded(&store);
        assert_eq!(table.get(0, 0).unwrap().composite, Some(42.0));
        assert_eq!(table.get(0, 0).unwrap().original, None);

        table.recompute(&WeightVector::default(), &store);
        let first = *table.get(0, 0).unwrap();
        assert_eq!(first.original, Some(42.0));
        assert!((first.composite.unwrap() - 10.0).abs() < 1e-9);

        let mut heavier = WeightVector::default();
        heavier.set(Factor::Census, 1.0);
        table.recompute(&heavier, &store);
        let second = *table.get(0, 0).unwrap();
        assert_eq!(second.original, Some(42.0));
        assert!((second.composite.unwrap() - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_original_falls_back_to_first_computed_value() {
        let record = scored_record(0.0, 0.0, [5.0; 7], false, false, false);
        let store = store_with(vec![record]);
        let mut table = ScoreTable::seeded(&store);

        table.recompute(&WeightVector::default(), &store);
        assert_eq!(table.get(0, 0).unwrap().original, Some(5.0));

        let mut zero = WeightVector::default();
        zero.set(Factor::Census, 0.0);
        table.recompute(&zero, &store);
        let score = table.get(0, 0).unwrap();
        assert_eq!(score.original, Some(5.0));
        assert!((score.composite.unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_recompute_visits_every_chunk() {
        let mut store = ChunkStore::new();
        store.push(Chunk::new(0, vec![scored_record(0.0, 0.0, [1.0; 7], false, false, false)]));
        store.push(Chunk::new(1, vec![scored_record(50.0, 50.0, [2.0; 7], false, false, false)]));
        let mut table = ScoreTable::seeded(&store);
        table.recompute(&WeightVector::default(), &store);

        assert!((table.get(0, 0).unwrap().composite.unwrap() - 1.0).abs() < 1e-9);
        assert!((table.get(1, 0).unwrap().composite.unwrap() - 2.0).abs() < 1e-9);
        assert!(table.get(2, 0).is_none());
    }

    #[test]
    fn test_weights_serialize_with_factor_keys() {
        let json = serde_json::to_value(WeightVector::default()).unwrap();
        for factor in Factor::ALL {
            assert!(json.get(factor.key()).is_some(), "missing {}", factor.key());
        }
    }
}
