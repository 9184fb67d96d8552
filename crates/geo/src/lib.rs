//! Geo filter — covered-by and intersects tests on planar coordinates, and
//! the bounding-box parser used by map search.

pub mod bbox;
pub mod spatial;

pub use bbox::{parse_bbox, BoundingBox};
pub use spatial::{covered_by, intersects, Geometry};
