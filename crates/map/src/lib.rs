//! Map listings — groups and events located inside a client bounding box.

pub mod search;

pub use search::{MapEvent, MapGroup, MapQuery, MapSearch, BBOX_ERROR_MESSAGE};
