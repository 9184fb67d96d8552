//! Planar spatial predicates over (longitude, latitude) pairs.
//!
//! Two distinct operations are exposed:
//! - [`covered_by`]: a point lies inside a polygon or on its boundary. Used
//!   for segment targeting.
//! - [`intersects`]: two geometries share at least one point. Used for map
//!   bounding-box search.
//!
//! Inside/outside is decided with the even-odd rule over every ring of the
//! polygon, so self-intersecting rings alternate between inside and outside
//! at each crossing. Holes fall out of the same rule.

use audience_core::types::{GeoPoint, Polygon};
use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-12;

/// Geometry accepted by [`intersects`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Point(GeoPoint),
    Polygon(Polygon),
}

impl From<GeoPoint> for Geometry {
    fn from(point: GeoPoint) -> Self {
        Geometry::Point(point)
    }
}

impl From<Polygon> for Geometry {
    fn from(polygon: Polygon) -> Self {
        Geometry::Polygon(polygon)
    }
}

/// Whether `point` lies inside `polygon` or on any of its rings.
pub fn covered_by(point: &GeoPoint, polygon: &Polygon) -> bool {
    if polygon.rings().any(|ring| on_ring(point, ring)) {
        return true;
    }
    polygon
        .rings()
        .fold(false, |inside, ring| inside ^ odd_crossings(point, ring))
}

/// Whether the two geometries share at least one point.
pub fn intersects(a: &Geometry, b: &Geometry) -> bool {
    match (a, b) {
        (Geometry::Point(p), Geometry::Point(q)) => same_point(p, q),
        (Geometry::Point(p), Geometry::Polygon(poly))
        | (Geometry::Polygon(poly), Geometry::Point(p)) => covered_by(p, poly),
        (Geometry::Polygon(a), Geometry::Polygon(b)) => polygons_intersect(a, b),
    }
}

fn polygons_intersect(a: &Polygon, b: &Polygon) -> bool {
    let edges_cross = a.rings().any(|ring_a| {
        edges(ring_a).any(|(p1, p2)| {
            b.rings()
                .any(|ring_b| edges(ring_b).any(|(q1, q2)| segments_intersect(p1, p2, q1, q2)))
        })
    });
    if edges_cross {
        return true;
    }
    // No boundary contact: one polygon is either nested in the other or
    // they are disjoint.
    a.exterior.iter().any(|p| covered_by(p, b)) || b.exterior.iter().any(|q| covered_by(q, a))
}

/// Consecutive vertex pairs, closing the ring back to its first vertex.
fn edges(ring: &[GeoPoint]) -> impl Iterator<Item = (&GeoPoint, &GeoPoint)> {
    let n = ring.len();
    (0..n).map(move |i| (&ring[i], &ring[(i + 1) % n]))
}

fn odd_crossings(point: &GeoPoint, ring: &[GeoPoint]) -> bool {
    let mut odd = false;
    for (a, b) in edges(ring) {
        if (a.lat > point.lat) != (b.lat > point.lat) {
            let lon_at = (b.lon - a.lon) * (point.lat - a.lat) / (b.lat - a.lat) + a.lon;
            if point.lon < lon_at {
                odd = !odd;
            }
        }
    }
    odd
}

fn on_ring(point: &GeoPoint, ring: &[GeoPoint]) -> bool {
    edges(ring).any(|(a, b)| on_segment(point, a, b))
}

fn on_segment(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> bool {
    cross(a, b, p).abs() <= EPSILON && within_extent(p, a, b)
}

fn within_extent(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> bool {
    p.lon >= a.lon.min(b.lon) - EPSILON
        && p.lon <= a.lon.max(b.lon) + EPSILON
        && p.lat >= a.lat.min(b.lat) - EPSILON
        && p.lat <= a.lat.max(b.lat) + EPSILON
}

fn same_point(p: &GeoPoint, q: &GeoPoint) -> bool {
    (p.lon - q.lon).abs() <= EPSILON && (p.lat - q.lat).abs() <= EPSILON
}

/// Z component of (b - a) × (p - a).
fn cross(a: &GeoPoint, b: &GeoPoint, p: &GeoPoint) -> f64 {
    (b.lon - a.lon) * (p.lat - a.lat) - (b.lat - a.lat) * (p.lon - a.lon)
}

fn orientation(a: &GeoPoint, b: &GeoPoint, p: &GeoPoint) -> i8 {
    let c = cross(a, b, p);
    if c > EPSILON {
        1
    } else if c < -EPSILON {
        -1
    } else {
        0
    }
}

/// Closed segments [p1, p2] and [q1, q2] touch or cross.
fn segments_intersect(p1: &GeoPoint, p2: &GeoPoint, q1: &GeoPoint, q2: &GeoPoint) -> bool {
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == 0 && within_extent(q1, p1, p2))
        || (o2 == 0 && within_extent(q2, p1, p2))
        || (o3 == 0 && within_extent(p1, q1, q2))
        || (o4 == 0 && within_extent(p2, q1, q2))
}
