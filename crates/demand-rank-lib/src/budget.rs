//! Render budgeter
//!
//! Caps the filtered set to a renderable count. Records inside the view are preferred;
//! when they alone exceed the ceiling they are thinned uniformly at random, otherwise the
//! remaining headroom is spread randomly over records outside the view. The result size
//! only matches the ceiling in expectation.

use crate::ScoredFeature;
use crate::utils::rect_contains;
use geo::Rect;
use rand::Rng;

/// Sample `features` down to roughly `ceiling` records
///
/// At or below the ceiling the input is returned untouched. Above it, the input is split
/// into in-view and out-of-view records by an inclusive point-in-rect test on each
/// record's position:
///
/// - fewer than `ceiling` in view: every in-view record is kept and each out-of-view
///   record is kept with probability `(ceiling - in_view) / out_of_view`
/// - otherwise: each in-view record is kept with probability `ceiling / in_view` and
///   out-of-view records are dropped
///
/// Relative order is preserved within the in-view and the out-of-view groups; in-view
/// records come first.
pub fn sample_for_render<'a, R>(
    features: Vec<ScoredFeature<'a>>,
    bounds: &Rect<f64>,
    ceiling: usize,
    rng: &mut R,
) -> Vec<ScoredFeature<'a>>
where
    R: Rng + ?Sized,
{
    #[cfg(feature = "profiling")]
    profiling::scope!("budget::sample_for_render");

    if features.len() <= ceiling {
        return features;
    }

    let total = features.len();
    let (in_view, out_of_view): (Vec<_>, Vec<_>) = features
        .into_iter()
        .partition(|feature| rect_contains(bounds, feature.record.position));

    let sampled = if in_view.len() < ceiling {
        let probability = (ceiling - in_view.len()) as f64 / out_of_view.len() as f64;
        let mut kept = in_view;
        kept.extend(
            out_of_view
                .into_iter()
                .filter(|_| rng.random_bool(probability.clamp(0.0, 1.0))),
        );
        kept
    } else {
        let probability = ceiling as f64 / in_view.len() as f64;
        in_view
            .into_iter()
            .filter(|_| rng.random_bool(probability.clamp(0.0, 1.0)))
            .collect()
    };

    tracing::debug!(
        "Sampled {} of {} features for a ceiling of {}",
        sampled.len(),
        total,
        ceiling
    );
    sampled
}
