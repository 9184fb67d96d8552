//! Bounding boxes received from map clients as `[lon1, lat1, lon2, lat2]`.

use audience_core::types::{GeoPoint, Polygon};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Axis-aligned rectangle with `lon1 < lon2` and `lat1 < lat2`, inside the
/// valid longitude/latitude ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lon1: f64,
    pub lat1: f64,
    pub lon2: f64,
    pub lat2: f64,
}

impl BoundingBox {
    /// Validates corner ordering and ranges. Out-of-range boxes are rejected,
    /// never clamped.
    pub fn new(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> Option<Self> {
        let lon_ok = -180.0 <= lon1 && lon1 < lon2 && lon2 <= 180.0;
        let lat_ok = -90.0 <= lat1 && lat1 < lat2 && lat2 <= 90.0;
        (lon_ok && lat_ok).then_some(Self {
            lon1,
            lat1,
            lon2,
            lat2,
        })
    }

    /// The rectangle as a counter-clockwise polygon.
    pub fn to_polygon(&self) -> Polygon {
        Polygon::new(vec![
            GeoPoint::new(self.lon1, self.lat1),
            GeoPoint::new(self.lon2, self.lat1),
            GeoPoint::new(self.lon2, self.lat2),
            GeoPoint::new(self.lon1, self.lat2),
        ])
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.lon1, self.lat1, self.lon2, self.lat2]
    }
}

/// Parses untrusted bbox input. Anything other than a JSON array of exactly
/// four numbers (or numeric strings) forming a valid box yields `None`.
pub fn parse_bbox(raw: &str) -> Option<BoundingBox> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "bbox is not valid JSON");
            return None;
        }
    };

    let items = value.as_array()?;
    if items.len() != 4 {
        debug!(len = items.len(), "bbox must have exactly 4 elements");
        return None;
    }

    let coords = items
        .iter()
        .map(coordinate)
        .collect::<Option<Vec<f64>>>()?;

    let bbox = BoundingBox::new(coords[0], coords[1], coords[2], coords[3]);
    if bbox.is_none() {
        debug!(?coords, "bbox rejected: corner ordering or range");
    }
    bbox
}

fn coordinate(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
