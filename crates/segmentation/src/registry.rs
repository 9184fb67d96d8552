//! Persisted segment definitions and their audience estimates.

use std::path::Path;
use std::sync::Arc;

use audience_core::error::{AudienceError, AudienceResult};
use audience_core::store::RecordStore;
use dashmap::DashMap;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::{SegmentDefinition, SegmentResolver};

/// Admin listing row: a segment and its current estimated audience.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSummary {
    pub id: Uuid,
    pub name: String,
    pub subscribers: usize,
}

pub struct SegmentRegistry {
    segments: DashMap<Uuid, SegmentDefinition>,
    resolver: SegmentResolver,
}

impl SegmentRegistry {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            segments: DashMap::new(),
            resolver: SegmentResolver::new(store),
        }
    }

    /// Read definitions from a JSON array file.
    pub fn load(&self, path: impl AsRef<Path>) -> AudienceResult<usize> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let definitions: Vec<SegmentDefinition> = serde_json::from_str(&raw)?;
        let count = definitions.len();
        for definition in definitions {
            self.register(definition);
        }
        info!(path = %path.display(), count, "loaded segment definitions");
        Ok(count)
    }

    pub fn register(&self, definition: SegmentDefinition) {
        self.segments.insert(definition.id, definition);
    }

    pub fn get(&self, id: &Uuid) -> Option<SegmentDefinition> {
        self.segments.get(id).map(|s| s.clone())
    }

    pub fn remove(&self, id: &Uuid) -> AudienceResult<SegmentDefinition> {
        self.segments
            .remove(id)
            .map(|(_, s)| s)
            .ok_or_else(|| AudienceError::NotFound(format!("segment {id}")))
    }

    /// Definitions ordered by name, then id.
    pub fn list(&self) -> Vec<SegmentDefinition> {
        let mut segments: Vec<_> = self.segments.iter().map(|s| s.value().clone()).collect();
        segments.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        segments
    }

    /// Current subscriber estimate for one segment.
    pub fn estimate(&self, id: &Uuid) -> AudienceResult<usize> {
        let definition = self
            .get(id)
            .ok_or_else(|| AudienceError::NotFound(format!("segment {id}")))?;
        self.resolver.resolve_count(&definition)
    }

    pub fn summaries(&self) -> AudienceResult<Vec<SegmentSummary>> {
        self.list()
            .into_iter()
            .map(|definition| -> AudienceResult<SegmentSummary> {
                Ok(SegmentSummary {
                    subscribers: self.resolver.resolve_count(&definition)?,
                    id: definition.id,
                    name: definition.name,
                })
            })
            .collect()
    }

    pub fn resolver(&self) -> &SegmentResolver {
        &self.resolver
    }
}
