//! Feature records and partition parsing
//!
//! A partition document is either a GeoJSON `FeatureCollection` or a bare array of
//! features. Each feature becomes one [`FeatureRecord`] with a representative position,
//! seven factor scores and three boolean flags. The source properties are kept verbatim
//! so the record can be exported again.

use crate::{DemandError, Result};
use geo::{Coord, LineString};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Property name of the composite demand value
pub const DEMAND_RANK_KEY: &str = "demand_rank";
/// Alternative casing of the composite demand value accepted on input
pub const DEMAND_RANK_KEY_ALT: &str = "DemandRank";
/// Property name holding the first composite value a record ever had
pub const ORIGINAL_DEMAND_RANK_KEY: &str = "original_demand_rank";

const PEDESTRIAN_FEASIBLE_KEY: &str = "pedestrian_feasible";
const URBAN_CONTEXT_KEY: &str = "urban_context";
const SIDEWALKS_KEY: &str = "sidewalks";

/// One of the seven normalized sub-scores carried by every record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Factor {
    Census,
    Crash,
    FuncClass,
    School,
    Trail,
    Rail,
    Bus,
}

impl Factor {
    pub const ALL: [Factor; 7] = [
        Factor::Census,
        Factor::Crash,
        Factor::FuncClass,
        Factor::School,
        Factor::Trail,
        Factor::Rail,
        Factor::Bus,
    ];

    /// Position of the factor inside [`FactorScores`]
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short name used by weight vectors and commands
    pub fn key(self) -> &'static str {
        match self {
            Self::Census => "census",
            Self::Crash => "crash",
            Self::FuncClass => "funcClass",
            Self::School => "school",
            Self::Trail => "trail",
            Self::Rail => "rail",
            Self::Bus => "bus",
        }
    }

    /// Property name in the input data
    pub fn property(self) -> &'static str {
        match self {
            Self::Census => "census_score",
            Self::Crash => "crash_risk_score",
            Self::FuncClass => "functional_class_score",
            Self::School => "school_proximity_score",
            Self::Trail => "trail_proximity_score",
            Self::Rail => "rail_proximity_score",
            Self::Bus => "bus_proximity_score",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|factor| factor.key() == key)
    }
}

/// The seven factor scores of a record, indexed by [`Factor::index`]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FactorScores([f64; 7]);

impl FactorScores {
    pub fn new(values: [f64; 7]) -> Self {
        Self(values)
    }

    #[inline]
    pub fn get(&self, factor: Factor) -> f64 {
        self.0[factor.index()]
    }

    #[inline]
    pub fn set(&mut self, factor: Factor, value: f64) {
        self.0[factor.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Factor, f64)> + '_ {
        Factor::ALL.into_iter().map(|factor| (factor, self.get(factor)))
    }
}

/// Supported record geometries
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Point(Coord<f64>),
    LineString(LineString<f64>),
}

impl Geometry {
    /// Position used for rendering and in-view tests
    ///
    /// Line geometries use their first vertex, not a centroid.
    pub fn representative(&self) -> Option<Coord<f64>> {
        match self {
            Self::Point(coord) => Some(*coord),
            Self::LineString(line) => line.0.first().copied(),
        }
    }

    /// Every vertex of the geometry
    pub fn coords(&self) -> &[Coord<f64>] {
        match self {
            Self::Point(coord) => std::slice::from_ref(coord),
            Self::LineString(line) => &line.0,
        }
    }

    /// Parse a GeoJSON geometry object
    fn from_geojson(value: &Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DemandError::InvalidGeometry("missing geometry type".to_string()))?;
        let coordinates = value
            .get("coordinates")
            .ok_or_else(|| DemandError::InvalidGeometry("missing coordinates".to_string()))?;

        match kind {
            "Point" => Ok(Self::Point(parse_position(coordinates)?)),
            "LineString" => {
                let vertices = coordinates
                    .as_array()
                    .ok_or_else(|| {
                        DemandError::InvalidGeometry("LineString coordinates are not an array".to_string())
                    })?
                    .iter()
                    .map(parse_position)
                    .collect::<Result<Vec<_>>>()?;
                if vertices.is_empty() {
                    return Err(DemandError::InvalidGeometry("empty LineString".to_string()));
                }
                Ok(Self::LineString(LineString::new(vertices)))
            }
            other => Err(DemandError::InvalidGeometry(format!(
                "unsupported geometry type {other}"
            ))),
        }
    }

    /// GeoJSON geometry object for export
    pub fn to_geojson(&self) -> Value {
        match self {
            Self::Point(coord) => serde_json::json!({
                "type": "Point",
                "coordinates": [coord.x, coord.y],
            }),
            Self::LineString(line) => serde_json::json!({
                "type": "LineString",
                "coordinates": line.0.iter().map(|c| [c.x, c.y]).collect::<Vec<_>>(),
            }),
        }
    }
}

/// Parse a `[lon, lat, ...]` position
fn parse_position(value: &Value) -> Result<Coord<f64>> {
    let parts = value
        .as_array()
        .ok_or_else(|| DemandError::InvalidGeometry("position is not an array".to_string()))?;
    match (
        parts.first().and_then(Value::as_f64),
        parts.get(1).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => Ok(Coord { x, y }),
        _ => Err(DemandError::InvalidGeometry(format!(
            "position needs two numbers, got {value}"
        ))),
    }
}

/// One road/path segment or point
///
/// Records are immutable once loaded; derived scores live in a
/// [`ScoreTable`](crate::ScoreTable) next to them.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRecord {
    /// Optional external identifier
    pub id: Option<String>,
    /// Full geometry, used for chunk bounds and export
    pub geometry: Geometry,
    /// Representative (longitude, latitude) of the geometry
    pub position: Coord<f64>,
    pub factors: FactorScores,
    pub pedestrian_feasible: bool,
    pub urban_context: bool,
    pub has_sidewalk: bool,
    /// Composite demand value present in the source data, if any
    pub demand: Option<f64>,
    /// Source properties, kept verbatim for export
    pub properties: Map<String, Value>,
}

impl FeatureRecord {
    /// Create a bare record for the given geometry
    ///
    /// Returns `None` when the geometry has no usable position.
    pub fn new(geometry: Geometry) -> Option<Self> {
        let position = geometry.representative()?;
        Some(Self {
            id: None,
            geometry,
            position,
            factors: FactorScores::default(),
            pedestrian_feasible: false,
            urban_context: false,
            has_sidewalk: false,
            demand: None,
            properties: Map::new(),
        })
    }

    fn from_raw(raw: RawFeature) -> Result<Self> {
        let geometry = raw
            .geometry
            .as_ref()
            .ok_or_else(|| DemandError::InvalidGeometry("feature has no geometry".to_string()))
            .and_then(Geometry::from_geojson)?;
        let mut record = Self::new(geometry)
            .ok_or_else(|| DemandError::InvalidGeometry("geometry has no position".to_string()))?;

        let properties = raw.properties.unwrap_or_default();
        for factor in Factor::ALL {
            record
                .factors
                .set(factor, number_property(&properties, factor.property()).unwrap_or(0.0));
        }
        record.pedestrian_feasible = flag_property(&properties, PEDESTRIAN_FEASIBLE_KEY);
        record.urban_context = flag_property(&properties, URBAN_CONTEXT_KEY);
        record.has_sidewalk = flag_property(&properties, SIDEWALKS_KEY);
        record.demand = number_property(&properties, DEMAND_RANK_KEY)
            .or_else(|| number_property(&properties, DEMAND_RANK_KEY_ALT));
        record.id = raw
            .id
            .as_ref()
            .or_else(|| properties.get("id"))
            .and_then(id_string);
        record.properties = properties;

        Ok(record)
    }
}

/// Numeric property; booleans read as 0/1 and numeric strings are parsed
fn number_property(properties: &Map<String, Value>, key: &str) -> Option<f64> {
    match properties.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Boolean-as-integer property: only `1` (or `true`) counts as set
fn flag_property(properties: &Map<String, Value>, key: &str) -> bool {
    number_property(properties, key) == Some(1.0)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Deserialize)]
struct RawFeature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    geometry: Option<Value>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Collection { features: Vec<RawFeature> },
    Features(Vec<RawFeature>),
}

/// Records parsed from one partition document
#[derive(Debug, Default)]
pub struct ParsedPartition {
    pub records: Vec<FeatureRecord>,
    /// Features dropped because they had no usable position
    pub dropped: usize,
}

/// Parse a partition document into records
///
/// A malformed document is an error; a malformed feature is only counted in
/// [`ParsedPartition::dropped`].
pub fn parse_partition(bytes: &[u8]) -> Result<ParsedPartition> {
    let features = match serde_json::from_slice::<RawDocument>(bytes)? {
        RawDocument::Collection { features } => features,
        RawDocument::Features(features) => features,
    };

    let mut parsed = ParsedPartition {
        records: Vec::with_capacity(features.len()),
        dropped: 0,
    };
    for raw in features {
        match FeatureRecord::from_raw(raw) {
            Ok(record) => parsed.records.push(record),
            Err(e) => {
                tracing::trace!("Dropping feature: {e}");
                parsed.dropped += 1;
            }
        }
    }
    Ok(parsed)
}
