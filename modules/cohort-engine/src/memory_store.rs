//! ReferenceCopyStore implementations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use cohort_instances::{
    EntityDetail, EntitySummary, InstanceGraph, InstanceHeader, InstanceStatus, Relationship,
};
use tracing::debug;

use crate::traits::ReferenceCopyStore;

/// Where a reference copy is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceState {
    Absent,
    Known,
    Deleted,
    Purged,
}

/// Every call the store received, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    SaveEntity {
        source: String,
        entity: EntityDetail,
    },
    SaveRelationship {
        source: String,
        relationship: Relationship,
    },
    RefreshEntity {
        source: String,
        guid: String,
        type_def_guid: String,
        type_def_name: String,
        home_collection_id: String,
        requested_by: String,
    },
    RefreshRelationship {
        source: String,
        guid: String,
        type_def_guid: String,
        type_def_name: String,
        home_collection_id: String,
        requested_by: String,
    },
    PurgeEntity {
        source: String,
        guid: String,
        type_def_guid: String,
        type_def_name: String,
        home_collection_id: String,
    },
    PurgeRelationship {
        source: String,
        guid: String,
        type_def_guid: String,
        type_def_name: String,
        home_collection_id: String,
    },
    SaveBatch {
        source: String,
        graph: InstanceGraph,
    },
    IsEntityKnown {
        guid: String,
    },
    IsRelationshipKnown {
        guid: String,
    },
}

impl StoreCall {
    /// Anything other than an existence check.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            StoreCall::IsEntityKnown { .. } | StoreCall::IsRelationshipKnown { .. }
        )
    }
}

#[derive(Default)]
struct Copies {
    entities: HashMap<String, EntityDetail>,
    relationships: HashMap<String, Relationship>,
    purged_entities: HashSet<String>,
    purged_relationships: HashSet<String>,
}

impl Copies {
    fn upsert_entity(&mut self, entity: &EntityDetail) -> bool {
        let guid = &entity.header.guid;
        if self.purged_entities.contains(guid) {
            debug!(guid = guid.as_str(), "Ignoring save for purged entity");
            return false;
        }
        if let Some(existing) = self.entities.get(guid) {
            if existing.header.version > entity.header.version {
                debug!(
                    guid = guid.as_str(),
                    stored = existing.header.version,
                    incoming = entity.header.version,
                    "Ignoring stale entity version"
                );
                return false;
            }
        }
        self.entities.insert(guid.clone(), as_reference_copy(entity.clone()));
        true
    }

    fn upsert_relationship(&mut self, relationship: &Relationship) -> bool {
        let guid = &relationship.header.guid;
        if self.purged_relationships.contains(guid) {
            debug!(guid = guid.as_str(), "Ignoring save for purged relationship");
            return false;
        }
        if let Some(existing) = self.relationships.get(guid) {
            if existing.header.version > relationship.header.version {
                debug!(
                    guid = guid.as_str(),
                    stored = existing.header.version,
                    incoming = relationship.header.version,
                    "Ignoring stale relationship version"
                );
                return false;
            }
        }
        let mut copy = relationship.clone();
        mark_reference_copy(&mut copy.header);
        self.relationships.insert(guid.clone(), copy);
        true
    }
}

fn as_reference_copy(mut entity: EntityDetail) -> EntityDetail {
    mark_reference_copy(&mut entity.header);
    entity
}

fn mark_reference_copy(header: &mut InstanceHeader) {
    if header.replicated_by.is_none() {
        header.replicated_by = header.metadata_collection_id.clone();
    }
}

/// In-memory reference copy store.
///
/// Applies the reference copy lifecycle: saves are version-ordered (an older
/// version never replaces a newer one), a `Deleted` status keeps the copy
/// addressable, and purge is terminal and idempotent. Every call is recorded
/// for assertions. Thread-safe.
#[derive(Default)]
pub struct MemoryReferenceStore {
    copies: Mutex<Copies>,
    calls: Mutex<Vec<StoreCall>>,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls received so far (for test assertions).
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn mutation_calls(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(StoreCall::is_mutation)
            .collect()
    }

    pub fn entity(&self, guid: &str) -> Option<EntityDetail> {
        self.copies().entities.get(guid).cloned()
    }

    pub fn relationship(&self, guid: &str) -> Option<Relationship> {
        self.copies().relationships.get(guid).cloned()
    }

    pub fn state_of(&self, guid: &str) -> ReferenceState {
        let copies = self.copies();
        if copies.purged_entities.contains(guid) || copies.purged_relationships.contains(guid) {
            return ReferenceState::Purged;
        }
        let status = copies
            .entities
            .get(guid)
            .map(|e| e.header.status)
            .or_else(|| copies.relationships.get(guid).map(|r| r.header.status));
        match status {
            None => ReferenceState::Absent,
            Some(InstanceStatus::Deleted) => ReferenceState::Deleted,
            Some(_) => ReferenceState::Known,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.copies().entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.copies().relationships.len()
    }

    fn copies(&self) -> MutexGuard<'_, Copies> {
        self.copies.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log_call(&self, call: StoreCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    fn purge(&self, guid: &str, relationship: bool) {
        let mut copies = self.copies();
        let removed = if relationship {
            copies.purged_relationships.insert(guid.to_string());
            copies.relationships.remove(guid).is_some()
        } else {
            copies.purged_entities.insert(guid.to_string());
            copies.entities.remove(guid).is_some()
        };
        if !removed {
            debug!(guid, "Purge for instance with no local reference copy");
        }
    }
}

#[async_trait]
impl ReferenceCopyStore for MemoryReferenceStore {
    async fn save_entity_reference_copy(&self, source: &str, entity: &EntityDetail) -> Result<()> {
        self.log_call(StoreCall::SaveEntity {
            source: source.to_string(),
            entity: entity.clone(),
        });
        self.copies().upsert_entity(entity);
        Ok(())
    }

    async fn save_relationship_reference_copy(
        &self,
        source: &str,
        relationship: &Relationship,
    ) -> Result<()> {
        self.log_call(StoreCall::SaveRelationship {
            source: source.to_string(),
            relationship: relationship.clone(),
        });
        self.copies().upsert_relationship(relationship);
        Ok(())
    }

    async fn refresh_entity_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
        requested_by: &str,
    ) -> Result<()> {
        self.log_call(StoreCall::RefreshEntity {
            source: source.to_string(),
            guid: instance_guid.to_string(),
            type_def_guid: type_def_guid.to_string(),
            type_def_name: type_def_name.to_string(),
            home_collection_id: home_collection_id.to_string(),
            requested_by: requested_by.to_string(),
        });
        Ok(())
    }

    async fn refresh_relationship_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
        requested_by: &str,
    ) -> Result<()> {
        self.log_call(StoreCall::RefreshRelationship {
            source: source.to_string(),
            guid: instance_guid.to_string(),
            type_def_guid: type_def_guid.to_string(),
            type_def_name: type_def_name.to_string(),
            home_collection_id: home_collection_id.to_string(),
            requested_by: requested_by.to_string(),
        });
        Ok(())
    }

    async fn purge_entity_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
    ) -> Result<()> {
        self.log_call(StoreCall::PurgeEntity {
            source: source.to_string(),
            guid: instance_guid.to_string(),
            type_def_guid: type_def_guid.to_string(),
            type_def_name: type_def_name.to_string(),
            home_collection_id: home_collection_id.to_string(),
        });
        self.purge(instance_guid, false);
        Ok(())
    }

    async fn purge_relationship_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
    ) -> Result<()> {
        self.log_call(StoreCall::PurgeRelationship {
            source: source.to_string(),
            guid: instance_guid.to_string(),
            type_def_guid: type_def_guid.to_string(),
            type_def_name: type_def_name.to_string(),
            home_collection_id: home_collection_id.to_string(),
        });
        self.purge(instance_guid, true);
        Ok(())
    }

    async fn save_instance_reference_copies(
        &self,
        source: &str,
        graph: &InstanceGraph,
    ) -> Result<()> {
        self.log_call(StoreCall::SaveBatch {
            source: source.to_string(),
            graph: graph.clone(),
        });
        // One lock for the whole batch so readers never see half of it.
        let mut copies = self.copies();
        for entity in &graph.entities {
            copies.upsert_entity(entity);
        }
        for relationship in &graph.relationships {
            copies.upsert_relationship(relationship);
        }
        Ok(())
    }

    async fn is_entity_known(&self, _source: &str, guid: &str) -> Result<Option<EntitySummary>> {
        self.log_call(StoreCall::IsEntityKnown {
            guid: guid.to_string(),
        });
        Ok(self.copies().entities.get(guid).map(EntityDetail::summary))
    }

    async fn is_relationship_known(
        &self,
        _source: &str,
        guid: &str,
    ) -> Result<Option<Relationship>> {
        self.log_call(StoreCall::IsRelationshipKnown {
            guid: guid.to_string(),
        });
        Ok(self.copies().relationships.get(guid).cloned())
    }
}

// ---------------------------------------------------------------------------
// Arc<S> blanket: lets tests share the store for assertions
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: ReferenceCopyStore + ?Sized> ReferenceCopyStore for Arc<S> {
    async fn save_entity_reference_copy(&self, source: &str, entity: &EntityDetail) -> Result<()> {
        (**self).save_entity_reference_copy(source, entity).await
    }

    async fn save_relationship_reference_copy(
        &self,
        source: &str,
        relationship: &Relationship,
    ) -> Result<()> {
        (**self)
            .save_relationship_reference_copy(source, relationship)
            .await
    }

    async fn refresh_entity_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
        requested_by: &str,
    ) -> Result<()> {
        (**self)
            .refresh_entity_reference_copy(
                source,
                instance_guid,
                type_def_guid,
                type_def_name,
                home_collection_id,
                requested_by,
            )
            .await
    }

    async fn refresh_relationship_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
        requested_by: &str,
    ) -> Result<()> {
        (**self)
            .refresh_relationship_reference_copy(
                source,
                instance_guid,
                type_def_guid,
                type_def_name,
                home_collection_id,
                requested_by,
            )
            .await
    }

    async fn purge_entity_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
    ) -> Result<()> {
        (**self)
            .purge_entity_reference_copy(
                source,
                instance_guid,
                type_def_guid,
                type_def_name,
                home_collection_id,
            )
            .await
    }

    async fn purge_relationship_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
    ) -> Result<()> {
        (**self)
            .purge_relationship_reference_copy(
                source,
                instance_guid,
                type_def_guid,
                type_def_name,
                home_collection_id,
            )
            .await
    }

    async fn save_instance_reference_copies(
        &self,
        source: &str,
        graph: &InstanceGraph,
    ) -> Result<()> {
        (**self).save_instance_reference_copies(source, graph).await
    }

    async fn is_entity_known(&self, source: &str, guid: &str) -> Result<Option<EntitySummary>> {
        (**self).is_entity_known(source, guid).await
    }

    async fn is_relationship_known(
        &self,
        source: &str,
        guid: &str,
    ) -> Result<Option<Relationship>> {
        (**self).is_relationship_known(source, guid).await
    }
}
