//! Export documents for the filtered set
//!
//! Both exporters write each record's source properties with the current composite in
//! `demand_rank` and the first composite in `original_demand_rank`.

use crate::record::{DEMAND_RANK_KEY, DEMAND_RANK_KEY_ALT, ORIGINAL_DEMAND_RANK_KEY};
use crate::{DemandError, Factor, Result, ScoredFeature};
use serde_json::{Map, Value, json};
use std::fmt::Write;

/// Source properties with the current scores written over them
fn export_properties(feature: &ScoredFeature<'_>) -> Map<String, Value> {
    let mut properties = feature.record.properties.clone();
    properties.remove(DEMAND_RANK_KEY_ALT);
    properties.insert(DEMAND_RANK_KEY.to_string(), number(feature.composite));
    if let Some(original) = feature.original {
        properties.insert(ORIGINAL_DEMAND_RANK_KEY.to_string(), number(original));
    }
    properties
}

/// JSON number, or null for non-finite values
fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn csv_cell(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    // Embedded quotes and newlines pass through as they are
    if text.contains(',') {
        format!("\"{text}\"")
    } else {
        text
    }
}

/// Tabular export of the filtered records
///
/// The header lists every scalar property of the first record; later records missing a
/// column get an empty cell. Cells containing a comma are quoted, but quotes and
/// newlines inside a cell are not escaped.
pub fn to_csv(features: &[ScoredFeature<'_>]) -> Result<String> {
    #[cfg(feature = "profiling")]
    profiling::scope!("export::to_csv");

    let first = features.first().ok_or(DemandError::NothingToExport)?;
    let headers: Vec<String> = export_properties(first)
        .into_iter()
        .filter(|(_, value)| is_scalar(value))
        .map(|(key, _)| key)
        .collect();

    let mut out = headers.join(",");
    out.push('\n');
    for feature in features {
        let properties = export_properties(feature);
        let row: Vec<String> = headers
            .iter()
            .map(|header| csv_cell(properties.get(header)))
            .collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }

    tracing::info!("Exported {} records as CSV", features.len());
    Ok(out)
}

/// GeoJSON `FeatureCollection` of the filtered records
pub fn to_geojson(features: &[ScoredFeature<'_>]) -> Result<Value> {
    if features.is_empty() {
        return Err(DemandError::NothingToExport);
    }

    let features: Vec<Value> = features
        .iter()
        .map(|feature| {
            let mut out = json!({
                "type": "Feature",
                "geometry": feature.record.geometry.to_geojson(),
                "properties": export_properties(feature),
            });
            if let Some(id) = &feature.record.id {
                out["id"] = Value::String(id.clone());
            }
            out
        })
        .collect();

    tracing::info!("Exported {} records as GeoJSON", features.len());
    Ok(json!({
        "type": "FeatureCollection",
        "features": features,
    }))
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

/// Hover summary of one record
pub fn describe_feature(feature: &ScoredFeature<'_>) -> String {
    let record = feature.record;
    let mut out = String::new();
    let _ = writeln!(out, "DemandRank: {:.2}", feature.composite);
    if let Some(original) = feature.original {
        let _ = writeln!(out, "Original DemandRank: {original:.2}");
    }
    let _ = writeln!(out, "Census Score: {}", record.factors.get(Factor::Census));
    let _ = writeln!(out, "Crash Risk Score: {}", record.factors.get(Factor::Crash));
    let _ = writeln!(out, "Pedestrian Feasible: {}", yes_no(record.pedestrian_feasible));
    let _ = writeln!(
        out,
        "Urban Context: {}",
        if record.urban_context { "Urban" } else { "Rural" }
    );
    let _ = write!(out, "Existing Sidewalks: {}", yes_no(record.has_sidewalk));
    out
}
