//! Audience segmentation — predicate model, segment resolver, fluent
//! builder and the registry of persisted mailing segments.

pub mod builder;
pub mod engine;
pub mod predicates;
pub mod registry;

pub use builder::SegmentBuilder;
pub use engine::{SegmentDefinition, SegmentResolver};
pub use predicates::{Candidate, DateField, Predicate};
pub use registry::{SegmentRegistry, SegmentSummary};
