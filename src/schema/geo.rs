//! `geo_shape` payload validation.
//!
//! A shape is a JSON object with a `type` discriminator and a payload whose
//! shape must match it. Polygon rings must be closed and carry at least
//! [`MIN_RING_POSITIONS`] positions. Optional index parameters are checked
//! individually when present.

use serde_json::{Map, Value as JsonValue};

use crate::error::ValidationError;

/// Minimum number of positions in a polygon ring (closing position included).
pub const MIN_RING_POSITIONS: usize = 5;

const DISTANCE_UNITS: &[&str] = &[
    "in",
    "inch",
    "yd",
    "yards",
    "ft",
    "feet",
    "km",
    "kilometers",
    "NM",
    "nmi",
    "nauticalmiles",
    "mm",
    "millimeters",
    "cm",
    "centimeters",
    "mi",
    "miles",
    "m",
    "meters",
];

const TREES: &[&str] = &["geohash", "quadtree"];
const STRATEGIES: &[&str] = &["recursive", "term"];
const ORIENTATIONS: &[&str] = &["cw", "ccw", "left", "right", "clockwise", "counterclockwise"];

type GeoResult = Result<(), String>;

pub(super) fn validate_geo_shape(value: &JsonValue, path: &str) -> Result<(), ValidationError> {
    let JsonValue::Object(obj) = value else {
        return Err(invalid(path, "must be an object"));
    };
    check_shape(obj, true)
        .and_then(|()| check_parameters(obj))
        .map_err(|reason| invalid(path, reason))
}

fn invalid(path: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidGeoShape {
        field: path.to_string(),
        reason: reason.into(),
    }
}

fn check_shape(obj: &Map<String, JsonValue>, allow_collection: bool) -> GeoResult {
    let shape_type = obj
        .get("type")
        .and_then(JsonValue::as_str)
        .ok_or("missing string 'type'")?
        .to_ascii_lowercase();

    if shape_type == "geometrycollection" {
        if !allow_collection {
            return Err("geometrycollection cannot nest".to_string());
        }
        let geometries = obj
            .get("geometries")
            .and_then(JsonValue::as_array)
            .ok_or("geometrycollection requires a 'geometries' array")?;
        for (i, geometry) in geometries.iter().enumerate() {
            let JsonValue::Object(inner) = geometry else {
                return Err(format!("geometries[{i}] must be an object"));
            };
            check_shape(inner, false).map_err(|e| format!("geometries[{i}]: {e}"))?;
        }
        return Ok(());
    }

    let coordinates = obj
        .get("coordinates")
        .ok_or_else(|| format!("{shape_type} requires 'coordinates'"))?;

    match shape_type.as_str() {
        "point" => position(coordinates),
        "linestring" => line_string(coordinates),
        "polygon" => polygon(coordinates),
        "multipoint" => non_empty_array(coordinates, "multipoint")?
            .iter()
            .try_for_each(position),
        "multilinestring" => non_empty_array(coordinates, "multilinestring")?
            .iter()
            .try_for_each(line_string),
        "multipolygon" => non_empty_array(coordinates, "multipolygon")?
            .iter()
            .try_for_each(polygon),
        "envelope" => {
            let corners = non_empty_array(coordinates, "envelope")?;
            if corners.len() != 2 {
                return Err("envelope requires exactly two corner positions".to_string());
            }
            corners.iter().try_for_each(position)
        }
        "circle" => {
            position(coordinates)?;
            let radius = obj
                .get("radius")
                .and_then(JsonValue::as_str)
                .ok_or("circle requires a 'radius' distance string")?;
            distance(radius).map_err(|e| format!("radius: {e}"))
        }
        other => Err(format!("unknown shape type '{other}'")),
    }
}

fn non_empty_array<'a>(value: &'a JsonValue, what: &str) -> Result<&'a Vec<JsonValue>, String> {
    match value.as_array() {
        Some(items) if !items.is_empty() => Ok(items),
        Some(_) => Err(format!("{what} coordinates must not be empty")),
        None => Err(format!("{what} coordinates must be an array")),
    }
}

fn position(value: &JsonValue) -> GeoResult {
    let items = value
        .as_array()
        .ok_or("position must be an array of numbers")?;
    if !(2..=3).contains(&items.len()) || !items.iter().all(JsonValue::is_number) {
        return Err(format!("position must be [lon, lat] (optionally with altitude), got {value}"));
    }
    Ok(())
}

fn line_string(value: &JsonValue) -> GeoResult {
    let points = non_empty_array(value, "linestring")?;
    if points.len() < 2 {
        return Err("linestring requires at least two positions".to_string());
    }
    points.iter().try_for_each(position)
}

fn polygon(value: &JsonValue) -> GeoResult {
    let rings = non_empty_array(value, "polygon")?;
    for (i, ring) in rings.iter().enumerate() {
        let points = ring
            .as_array()
            .ok_or_else(|| format!("ring {i} must be an array of positions"))?;
        if points.len() < MIN_RING_POSITIONS {
            return Err(format!(
                "ring {i} has {} positions, at least {MIN_RING_POSITIONS} required",
                points.len()
            ));
        }
        points.iter().try_for_each(position)?;
        if points.first() != points.last() {
            return Err(format!("ring {i} is not closed"));
        }
    }
    Ok(())
}

/// A distance string: a non-negative number with an optional unit suffix.
fn distance(s: &str) -> GeoResult {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    if number.is_empty() || number.parse::<f64>().is_err() {
        return Err(format!("'{s}' does not start with a number"));
    }
    let unit = unit.trim();
    if unit.is_empty() || DISTANCE_UNITS.contains(&unit) {
        Ok(())
    } else {
        Err(format!("'{unit}' is not a distance unit"))
    }
}

fn one_of(key: &str, value: &JsonValue, allowed: &[&str]) -> GeoResult {
    let s = value
        .as_str()
        .ok_or_else(|| format!("'{key}' must be a string"))?
        .to_ascii_lowercase();
    if allowed.contains(&s.as_str()) {
        Ok(())
    } else {
        Err(format!("'{key}' must be one of {allowed:?}, got '{s}'"))
    }
}

fn check_parameters(obj: &Map<String, JsonValue>) -> GeoResult {
    if let Some(v) = obj.get("tree") {
        one_of("tree", v, TREES)?;
    }
    for key in ["precision", "treeLevels"] {
        if let Some(v) = obj.get(key) {
            let s = v
                .as_str()
                .ok_or_else(|| format!("'{key}' must be a distance string"))?;
            distance(s).map_err(|e| format!("{key}: {e}"))?;
        }
    }
    if let Some(v) = obj.get("strategy") {
        one_of("strategy", v, STRATEGIES)?;
    }
    if let Some(v) = obj.get("distanceErrorPct") {
        match v.as_f64() {
            Some(pct) if (0.0..=100.0).contains(&pct) => {}
            _ => return Err(format!("'distanceErrorPct' must be a number in [0, 100], got {v}")),
        }
    }
    if let Some(v) = obj.get("orientation") {
        one_of("orientation", v, ORIENTATIONS)?;
    }
    Ok(())
}
