//! Chunk store - loaded partitions indexed by bounding box
//!
//! Partitions are probed concurrently from index 0 with all-settled semantics: a
//! missing partition is left out, a run of missing partitions ends the series, a
//! failing partition is logged and skipped, and loading always continues with whatever
//! succeeded.
//!
//! Chunks are never evicted. Everything loaded stays resident for the life of the
//! store, so memory grows with the size of the series.

use crate::{DemandError, FeatureRecord, PartitionSource, Result, parse_partition};
use geo::{Coord, Rect};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Partition probing configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadConfig {
    /// Number of partition indices probed concurrently per wave
    pub probe_batch: usize,
    /// Hard cap on the number of partition indices ever probed
    pub max_partitions: usize,
    /// Consecutive missing indices that mark the end of the series
    pub end_gap: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            probe_batch: 8,
            max_partitions: 4096,
            end_gap: 8,
        }
    }
}

/// An immutable batch of records loaded together
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position in the partition series
    index: usize,
    records: Arc<[FeatureRecord]>,
    /// Bounds over every vertex of every geometry; `None` when there is nothing to bound
    bounding_box: Option<Rect<f64>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Chunk {
    pub fn new(index: usize, records: Vec<FeatureRecord>) -> Self {
        let bounding_box = compute_bounds(&records);
        Self {
            index,
            records: records.into(),
            bounding_box,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        self.bounding_box
    }

    /// Center of the bounding box
    #[inline]
    pub fn centroid(&self) -> Option<Coord<f64>> {
        self.bounding_box.map(|bbox| bbox.center())
    }
}

/// Scan every vertex of every geometry (not just the representative position)
fn compute_bounds(records: &[FeatureRecord]) -> Option<Rect<f64>> {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    let mut found = false;

    for coord in records.iter().flat_map(|record| record.geometry.coords()) {
        if !coord.x.is_finite() || !coord.y.is_finite() {
            continue;
        }
        min_x = min_x.min(coord.x);
        min_y = min_y.min(coord.y);
        max_x = max_x.max(coord.x);
        max_y = max_y.max(coord.y);
        found = true;
    }

    found.then(|| Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y }))
}

/// Outcome of a load, for diagnostics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Partitions that loaded successfully
    pub loaded: usize,
    /// Indices inside the series answered with "does not exist"
    pub not_found: usize,
    /// Partitions that failed for any other reason, with the reason
    pub failed: Vec<(usize, String)>,
    /// Records dropped during ingestion for lack of a usable position
    pub dropped_records: usize,
}

/// All loaded chunks
///
/// Chunks are kept in the order their loads settled, which is not index order.
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
    report: LoadReport,
    total_records: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loaded chunk
    pub fn push(&mut self, chunk: Chunk) {
        self.total_records += chunk.len();
        self.report.loaded += 1;
        self.chunks.push(chunk);
    }

    /// Probe and load every partition of `source`
    ///
    /// Indices are probed in concurrent waves of [`LoadConfig::probe_batch`], and every
    /// attempt in a wave settles before the next wave is considered. A missing index is
    /// only left out; the series ends at the first run of [`LoadConfig::end_gap`]
    /// consecutive missing indices, and nothing past that run is kept, so the loaded set
    /// does not depend on the wave size. Failed partitions are logged and skipped.
    ///
    /// Returns [`DemandError::NoValidRecords`] when nothing usable was loaded.
    pub async fn load_all<S>(source: Arc<S>, config: LoadConfig) -> Result<Self>
    where
        S: PartitionSource + 'static,
    {
        let mut store = Self::new();
        let batch = config.probe_batch.max(1);
        let end_gap = config.end_gap.max(1);
        let mut next_index = 0;
        let mut missing_run = 0;
        let mut missing_seen = 0;
        let mut series_end = None;

        while series_end.is_none() && next_index < config.max_partitions {
            let wave_end = (next_index + batch).min(config.max_partitions);
            let mut attempts = JoinSet::new();
            for index in next_index..wave_end {
                let source = source.clone();
                attempts.spawn(async move {
                    let outcome = match source.fetch(index).await {
                        Ok(Some(bytes)) => parse_partition(&bytes).map(Some),
                        Ok(None) => Ok(None),
                        Err(e) => Err(e),
                    };
                    (index, source.describe(index), outcome)
                });
            }

            // Settle order is kept for the store
            let mut settled = Vec::with_capacity(wave_end - next_index);
            while let Some(joined) = attempts.join_next().await {
                match joined {
                    Ok(attempt) => settled.push(attempt),
                    Err(e) => tracing::warn!("Partition load task did not complete: {e}"),
                }
            }

            let mut missing = vec![false; wave_end - next_index];
            for (index, _, outcome) in &settled {
                if matches!(outcome, Ok(None)) {
                    missing[index - next_index] = true;
                }
            }
            for (offset, is_missing) in missing.into_iter().enumerate() {
                if !is_missing {
                    missing_run = 0;
                    continue;
                }
                missing_run += 1;
                missing_seen += 1;
                if missing_run == end_gap {
                    series_end = Some(next_index + offset + 1 - end_gap);
                    break;
                }
            }

            let limit = series_end.unwrap_or(wave_end);
            for (index, location, outcome) in settled {
                if index >= limit {
                    tracing::trace!("Partition {index} lies past the end of the series");
                    continue;
                }
                match outcome {
                    Ok(Some(parsed)) => {
                        tracing::debug!(
                            "Loaded partition {index}: {} records ({} dropped)",
                            parsed.records.len(),
                            parsed.dropped
                        );
                        store.report.dropped_records += parsed.dropped;
                        store.push(Chunk::new(index, parsed.records));
                    }
                    Ok(None) => tracing::trace!("Partition {index} does not exist"),
                    Err(e) => {
                        tracing::warn!("Failed to load partition {index} ({location}): {e}");
                        store.report.failed.push((index, e.to_string()));
                    }
                }
            }
            next_index = wave_end;
        }
        // The run that ended the series is not part of it
        store.report.not_found = match series_end {
            Some(_) => missing_seen - end_gap,
            None => missing_seen,
        };

        tracing::info!(
            "Loaded {} partitions with {} records ({} missing, {} failed, {} records dropped)",
            store.report.loaded,
            store.total_records,
            store.report.not_found,
            store.report.failed.len(),
            store.report.dropped_records
        );

        store.ensure_not_empty()?;
        Ok(store)
    }

    /// Load one monolithic collection as a single chunk with index 0
    pub fn from_collection(bytes: &[u8]) -> Result<Self> {
        let parsed = parse_partition(bytes)?;
        let mut store = Self::new();
        store.report.dropped_records = parsed.dropped;
        store.push(Chunk::new(0, parsed.records));
        store.ensure_not_empty()?;
        Ok(store)
    }

    fn ensure_not_empty(&self) -> Result<()> {
        if self.total_records == 0 {
            tracing::error!("No valid records after ingestion");
            return Err(DemandError::NoValidRecords);
        }
        Ok(())
    }

    #[inline]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[inline]
    pub fn get(&self, slot: usize) -> Option<&Chunk> {
        self.chunks.get(slot)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total number of records across all chunks
    #[inline]
    pub fn total_records(&self) -> usize {
        self.total_records
    }

    #[inline]
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Combined bounds of all chunks, `None` when nothing is bounded
    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        self.chunks
            .iter()
            .filter_map(Chunk::bounding_box)
            .reduce(|acc, bbox| {
                Rect::new(
                    Coord {
                        x: acc.min().x.min(bbox.min().x),
                        y: acc.min().y.min(bbox.min().y),
                    },
                    Coord {
                        x: acc.max().x.max(bbox.max().x),
                        y: acc.max().y.max(bbox.max().y),
                    },
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::point_record;
    use crate::{FeatureRecord, Geometry, MemorySource};
    use geo::LineString;

    fn partition(points: &[(f64, f64)]) -> String {
        let features: Vec<String> = points
            .iter()
            .map(|(lon, lat)| {
                format!(
                    r#"{{"type":"Feature","geometry":{{"type":"Point","coordinates":[{lon},{lat}]}},"properties":{{"census_score":5}}}}"#
                )
            })
            .collect();
        format!(
            r#"{{"type":"FeatureCollection","features":[{}]}}"#,
            features.join(",")
        )
    }

    #[test]
    fn test_bounds_scan_every_line_vertex() {
        let line = FeatureRecord::new(Geometry::LineString(LineString::from(vec![
            (0.0, 0.0),
            (5.0, -3.0),
            (2.0, 8.0),
        ])))
        .unwrap();
        let chunk = Chunk::new(0, vec![line, point_record(-1.0, 1.0)]);

        let bbox = chunk.bounding_box().unwrap();
        assert_eq!(bbox.min(), Coord { x: -1.0, y: -3.0 });
        assert_eq!(bbox.max(), Coord { x: 5.0, y: 8.0 });
        assert_eq!(chunk.centroid(), Some(Coord { x: 2.0, y: 2.5 }));
    }

    #[test]
    fn test_empty_chunk_has_no_bounds() {
        let chunk = Chunk::new(4, Vec::new());
        assert!(chunk.is_empty());
        assert!(chunk.bounding_box().is_none());
        assert!(chunk.centroid().is_none());
    }

    #[tokio::test]
    async fn test_load_all_stops_at_missing_partition() {
        let source = MemorySource::new()
            .with_partition(0, partition(&[(0.0, 0.0), (1.0, 1.0)]))
            .with_partition(1, partition(&[(2.0, 2.0)]))
            .with_partition(2, partition(&[(3.0, 3.0)]));

        let config = LoadConfig {
            probe_batch: 2,
            max_partitions: 100,
            end_gap: 4,
        };
        let store = ChunkStore::load_all(Arc::new(source), config).await.unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.total_records(), 4);
        assert_eq!(store.report().loaded, 3);
        assert_eq!(store.report().not_found, 0);

        let mut indices: Vec<usize> = store.chunks().iter().map(Chunk::index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_load_all_skips_failed_partitions() {
        let source = MemorySource::new()
            .with_partition(0, partition(&[(0.0, 0.0)]))
            .with_failure(1, "server error")
            .with_partition(2, "{ definitely not json")
            .with_partition(3, partition(&[(3.0, 3.0)]));

        let config = LoadConfig {
            probe_batch: 8,
            max_partitions: 100,
            ..LoadConfig::default()
        };
        let store = ChunkStore::load_all(Arc::new(source), config).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.report().failed.len(), 2);
        let mut failed: Vec<usize> = store.report().failed.iter().map(|(i, _)| *i).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_load_all_skips_gaps_inside_the_series() {
        let source = MemorySource::new()
            .with_partition(0, partition(&[(0.0, 0.0)]))
            .with_partition(2, partition(&[(2.0, 2.0)]))
            .with_partition(9, partition(&[(9.0, 9.0)]));

        let config = LoadConfig {
            probe_batch: 4,
            max_partitions: 100,
            ..LoadConfig::default()
        };
        let store = ChunkStore::load_all(Arc::new(source), config).await.unwrap();

        let mut indices: Vec<usize> = store.chunks().iter().map(Chunk::index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 2, 9]);
        // 1 and 3..=8 are gaps; the run from 10 ends the series
        assert_eq!(store.report().not_found, 7);
    }

    #[tokio::test]
    async fn test_load_all_result_independent_of_probe_batch() {
        let mut source = MemorySource::new();
        for i in (0..20).filter(|&i| i != 3) {
            source = source.with_partition(i, partition(&[(i as f64, 0.0)]));
        }
        // A run of four missing indices ends the series before 30
        for i in 30..32 {
            source = source.with_partition(i, partition(&[(i as f64, 0.0)]));
        }
        let source = Arc::new(source);

        for probe_batch in [1, 2, 3, 8, 32] {
            let config = LoadConfig {
                probe_batch,
                max_partitions: 4096,
                end_gap: 4,
            };
            let store = ChunkStore::load_all(source.clone(), config).await.unwrap();
            let mut indices: Vec<usize> = store.chunks().iter().map(Chunk::index).collect();
            indices.sort_unstable();
            let expected: Vec<usize> = (0..20).filter(|&i| i != 3).collect();
            assert_eq!(indices, expected, "probe_batch {probe_batch}");
            assert_eq!(store.report().not_found, 1, "probe_batch {probe_batch}");
        }
    }

    #[tokio::test]
    async fn test_load_all_respects_max_partitions() {
        let mut source = MemorySource::new();
        for i in 0..10 {
            source = source.with_partition(i, partition(&[(i as f64, 0.0)]));
        }
        let config = LoadConfig {
            probe_batch: 3,
            max_partitions: 5,
            ..LoadConfig::default()
        };
        let store = ChunkStore::load_all(Arc::new(source), config).await.unwrap();
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn test_load_all_total_failure() {
        let source = MemorySource::new()
            .with_failure(0, "down")
            .with_partition(1, r#"{"type":"FeatureCollection","features":[]}"#);

        let result = ChunkStore::load_all(Arc::new(source), LoadConfig::default()).await;
        assert!(matches!(result, Err(DemandError::NoValidRecords)));
    }

    #[test]
    fn test_from_collection() {
        let store = ChunkStore::from_collection(partition(&[(1.0, 2.0), (3.0, 4.0)]).as_bytes())
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_records(), 2);
        let bbox = store.bounding_box().unwrap();
        assert_eq!(bbox.min(), Coord { x: 1.0, y: 2.0 });
        assert_eq!(bbox.max(), Coord { x: 3.0, y: 4.0 });
    }

    #[test]
    fn test_from_collection_counts_drops() {
        let doc = r#"[
            {"geometry": {"type": "Point", "coordinates": [1.0, 2.0]}, "properties": {}},
            {"geometry": null, "properties": {}}
        ]"#;
        let store = ChunkStore::from_collection(doc.as_bytes()).unwrap();
        assert_eq!(store.report().dropped_records, 1);
        assert!(matches!(
            ChunkStore::from_collection(b"[]"),
            Err(DemandError::NoValidRecords)
        ));
    }
}
