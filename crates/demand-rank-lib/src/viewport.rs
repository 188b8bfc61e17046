//! Viewport selector
//!
//! Chooses which loaded chunks are active for the current view. Candidates are the
//! chunks whose bounding box overlaps the view, ordered by the planar distance of their
//! box center from the view center, and admitted whole until the zoom-dependent feature
//! budget would be exceeded.

use crate::utils::{self, planar_distance, rects_intersect};
use crate::{Chunk, ChunkStore};
use geo::{Coord, Rect};

/// Feature budget applying up to a zoom level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomThreshold {
    pub zoom: f64,
    pub max_features: usize,
}

impl ZoomThreshold {
    pub const fn new(zoom: f64, max_features: usize) -> Self {
        Self { zoom, max_features }
    }

    /// Default budget steps: wider views get smaller budgets
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(8.0, 5_000),
            Self::new(10.0, 10_000),
            Self::new(12.0, 25_000),
            Self::new(14.0, 50_000),
            Self::new(16.0, 100_000),
        ]
    }
}

/// Feature budget for a zoom level
///
/// Uses the smallest threshold at or above `zoom`; past the last threshold the largest
/// one applies. With no thresholds at all the budget is unlimited.
pub fn budget_for_zoom(thresholds: &[ZoomThreshold], zoom: f64) -> usize {
    thresholds
        .iter()
        .filter(|t| zoom <= t.zoom)
        .min_by(|a, b| a.zoom.total_cmp(&b.zoom))
        .or_else(|| thresholds.iter().max_by(|a, b| a.zoom.total_cmp(&b.zoom)))
        .map_or(usize::MAX, |t| t.max_features)
}

/// The visible map area and zoom level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    /// Visible bounds, `x` longitude and `y` latitude
    pub bounds: Rect<f64>,
    /// View center; for a Mercator map this is not exactly the center of `bounds`
    pub center: Coord<f64>,
    pub zoom: f64,
}

impl ViewportState {
    /// Viewport centered on its bounds
    pub fn new(bounds: Rect<f64>, zoom: f64) -> Self {
        Self {
            bounds,
            center: bounds.center(),
            zoom,
        }
    }

    /// Viewport seen by a screen of `pixels` centered on `center` at `zoom`
    pub fn from_center_zoom(center: Coord<f64>, zoom: f64, pixels: (u32, u32)) -> Self {
        Self {
            bounds: utils::bounds_from_center_zoom(center, zoom, pixels),
            center,
            zoom,
        }
    }
}

/// Chunks chosen for the current view, in admission order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveSet {
    /// Store slots of the admitted chunks
    pub slots: Vec<usize>,
    /// Budget the admission ran against
    pub budget: usize,
    /// Records in the admitted chunks
    pub record_count: usize,
    /// Chunks that intersected the view, admitted or not
    pub candidate_count: usize,
}

/// Pick the active chunks for a viewport
///
/// The result replaces any previous active set. A chunk is admitted only if its whole
/// record count still fits the budget; the walk stops at the first chunk that does not
/// fit, so nothing after it is admitted either.
pub fn select_active_chunks(store: &ChunkStore, viewport: &ViewportState, budget: usize) -> ActiveSet {
    #[cfg(feature = "profiling")]
    profiling::scope!("viewport::select_active_chunks");

    let mut candidates: Vec<(usize, &Chunk, f64)> = store
        .chunks()
        .iter()
        .enumerate()
        .filter_map(|(slot, chunk)| {
            let bbox = chunk.bounding_box()?;
            rects_intersect(&bbox, &viewport.bounds)
                .then(|| (slot, chunk, planar_distance(bbox.center(), viewport.center)))
        })
        .collect();

    candidates.sort_by(|(_, a, da), (_, b, db)| {
        da.total_cmp(db).then_with(|| a.index().cmp(&b.index()))
    });

    let mut active = ActiveSet {
        slots: Vec::new(),
        budget,
        record_count: 0,
        candidate_count: candidates.len(),
    };
    for (slot, chunk, _) in candidates {
        match active.record_count.checked_add(chunk.len()) {
            Some(total) if total <= budget => {
                active.record_count = total;
                active.slots.push(slot);
            }
            _ => break,
        }
    }

    tracing::debug!(
        "Selected {} of {} candidate chunks ({} records, budget {})",
        active.slots.len(),
        active.candidate_count,
        active.record_count,
        budget
    );
    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::box_chunk;
    use crate::utils::rect_from_edges;

    fn scenario_store() -> ChunkStore {
        let mut store = ChunkStore::new();
        // Pushed out of index order on purpose, like settled loads
        store.push(box_chunk(2, 5.0, 5.0, 15.0, 15.0, 10)); // C
        store.push(box_chunk(0, 0.0, 0.0, 10.0, 10.0, 10)); // A
        store.push(box_chunk(1, 20.0, 0.0, 30.0, 10.0, 10)); // B
        store
    }

    #[test]
    fn test_budget_for_zoom() {
        let thresholds = ZoomThreshold::defaults();
        assert_eq!(budget_for_zoom(&thresholds, 3.0), 5_000);
        assert_eq!(budget_for_zoom(&thresholds, 8.0), 5_000);
        assert_eq!(budget_for_zoom(&thresholds, 8.5), 10_000);
        assert_eq!(budget_for_zoom(&thresholds, 16.0), 100_000);
        assert_eq!(budget_for_zoom(&thresholds, 19.0), 100_000);
        assert_eq!(budget_for_zoom(&[], 10.0), usize::MAX);
    }

    #[test]
    fn test_budget_for_zoom_unsorted_thresholds() {
        let thresholds = vec![ZoomThreshold::new(14.0, 50), ZoomThreshold::new(10.0, 10)];
        assert_eq!(budget_for_zoom(&thresholds, 9.0), 10);
        assert_eq!(budget_for_zoom(&thresholds, 15.0), 50);
    }

    #[test]
    fn test_three_chunk_scenario() {
        let store = scenario_store();
        let viewport = ViewportState::new(rect_from_edges(0.0, 0.0, 12.0, 12.0), 10.0);

        let active = select_active_chunks(&store, &viewport, 1_000);
        let indices: Vec<usize> = active
            .slots
            .iter()
            .map(|slot| store.get(*slot).unwrap().index())
            .collect();
        // A's centroid (5,5) is closer to the view center (6,6) than C's (10,10)
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(active.candidate_count, 2);
        assert_eq!(active.record_count, 20);
    }

    #[test]
    fn test_admission_stops_at_first_chunk_over_budget() {
        let mut store = ChunkStore::new();
        store.push(box_chunk(0, 0.0, 0.0, 2.0, 2.0, 6)); // nearest
        store.push(box_chunk(1, 0.0, 0.0, 6.0, 6.0, 8)); // would overflow
        store.push(box_chunk(2, 0.0, 0.0, 10.0, 10.0, 2)); // would fit but comes after
        let viewport = ViewportState {
            bounds: rect_from_edges(0.0, 0.0, 10.0, 10.0),
            center: Coord { x: 1.0, y: 1.0 },
            zoom: 12.0,
        };

        let active = select_active_chunks(&store, &viewport, 10);
        assert_eq!(active.slots, vec![0]);
        assert_eq!(active.record_count, 6);
    }

    #[test]
    fn test_exact_budget_is_admitted() {
        let store = scenario_store();
        let viewport = ViewportState::new(rect_from_edges(0.0, 0.0, 12.0, 12.0), 10.0);
        let active = select_active_chunks(&store, &viewport, 20);
        assert_eq!(active.slots.len(), 2);
        let active = select_active_chunks(&store, &viewport, 19);
        assert_eq!(active.slots.len(), 1);
    }

    #[test]
    fn test_admitted_chunks_intersect_and_are_ordered() {
        let mut store = ChunkStore::new();
        for i in 0..20 {
            let offset = i as f64 * 3.0;
            store.push(box_chunk(i, offset, offset, offset + 2.0, offset + 2.0, 3));
        }
        let viewport = ViewportState::new(rect_from_edges(10.0, 10.0, 40.0, 40.0), 12.0);
        let active = select_active_chunks(&store, &viewport, usize::MAX);

        assert!(!active.slots.is_empty());
        let mut last = f64::NEG_INFINITY;
        for slot in &active.slots {
            let bbox = store.get(*slot).unwrap().bounding_box().unwrap();
            assert!(rects_intersect(&bbox, &viewport.bounds));
            let distance = planar_distance(bbox.center(), viewport.center);
            assert!(distance >= last);
            last = distance;
        }
    }

    #[test]
    fn test_ties_broken_by_chunk_index() {
        let mut store = ChunkStore::new();
        store.push(box_chunk(7, 0.0, 0.0, 2.0, 2.0, 2));
        store.push(box_chunk(3, 0.0, 0.0, 2.0, 2.0, 2));
        let viewport = ViewportState::new(rect_from_edges(0.0, 0.0, 2.0, 2.0), 12.0);
        let active = select_active_chunks(&store, &viewport, 100);
        assert_eq!(active.slots, vec![1, 0]);
    }

    #[test]
    fn test_unbounded_chunks_are_never_active() {
        let mut store = ChunkStore::new();
        store.push(Chunk::new(0, Vec::new()));
        let viewport = ViewportState::new(rect_from_edges(-180.0, -90.0, 180.0, 90.0), 1.0);
        let active = select_active_chunks(&store, &viewport, 100);
        assert!(active.slots.is_empty());
        assert_eq!(active.candidate_count, 0);
    }

    #[test]
    fn test_from_center_zoom_keeps_center() {
        let center = Coord { x: -72.7, y: 41.6 };
        let viewport = ViewportState::from_center_zoom(center, 12.0, (800, 600));
        assert_eq!(viewport.center, center);
        assert!(utils::rect_contains(&viewport.bounds, center));
    }
}
