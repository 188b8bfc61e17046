//! Shareable view tokens
//!
//! A token is the URL-safe base64 (no padding) encoding of a small JSON payload holding
//! the view center, zoom and screen size together with the filter and weight state. The
//! view bounds are not stored; decoding derives them again from center, zoom and size.

use crate::{DemandError, Factor, FilterCriteria, Preset, Result, ViewportState, WeightVector};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use geo::Coord;
use serde::{Deserialize, Serialize};

const TOKEN_VERSION: u32 = 1;

/// View, filter and weight state that can be handed to someone else
#[derive(Debug, Clone, PartialEq)]
pub struct SharedView {
    pub viewport: ViewportState,
    /// Screen size in pixels the viewport was derived from
    pub pixels: (u32, u32),
    pub criteria: FilterCriteria,
    pub weights: WeightVector,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    v: u32,
    center: [f64; 2],
    zoom: f64,
    size: [u32; 2],
    range: [f64; 2],
    #[serde(default)]
    pedestrian: bool,
    #[serde(default)]
    urban: bool,
    #[serde(default)]
    sidewalks: bool,
    weights: WeightVector,
    #[serde(default)]
    preset: Option<Preset>,
}

impl SharedView {
    pub fn encode(&self) -> Result<String> {
        let payload = Payload {
            v: TOKEN_VERSION,
            center: [self.viewport.center.x, self.viewport.center.y],
            zoom: self.viewport.zoom,
            size: [self.pixels.0, self.pixels.1],
            range: [self.criteria.min_score, self.criteria.max_score],
            pedestrian: self.criteria.pedestrian_feasible_only,
            urban: self.criteria.urban_only,
            sidewalks: self.criteria.highlight_sidewalks,
            weights: self.weights,
            preset: self.criteria.preset,
        };
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| DemandError::InvalidShareToken(e.to_string()))?;
        let payload: Payload = serde_json::from_slice(&bytes)
            .map_err(|e| DemandError::InvalidShareToken(e.to_string()))?;
        if payload.v != TOKEN_VERSION {
            return Err(DemandError::InvalidShareToken(format!(
                "unsupported version {}",
                payload.v
            )));
        }

        let center = Coord {
            x: payload.center[0],
            y: payload.center[1],
        };
        let pixels = (payload.size[0], payload.size[1]);
        // Token values go through the same setters as interactive edits
        let mut criteria = FilterCriteria {
            pedestrian_feasible_only: payload.pedestrian,
            urban_only: payload.urban,
            highlight_sidewalks: payload.sidewalks,
            preset: payload.preset,
            ..FilterCriteria::default()
        };
        criteria.set_min_score(payload.range[0]);
        criteria.set_max_score(payload.range[1]);

        let mut weights = WeightVector::default();
        for factor in Factor::ALL {
            weights.set(factor, payload.weights.get(factor));
        }

        Ok(Self {
            viewport: ViewportState::from_center_zoom(center, payload.zoom, pixels),
            pixels,
            criteria,
            weights,
        })
    }
}
