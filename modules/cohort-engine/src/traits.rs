//! Collaborator seams for the replication engine.

use anyhow::Result;
use async_trait::async_trait;
use cohort_instances::{
    Classification, ConflictSide, EntityDetail, EntitySummary, EventOriginator, InstanceGraph,
    Relationship, TypeDefSummary,
};

use crate::audit::AuditRecord;
use crate::conflict::ConflictReport;
use crate::dispatcher::DispatchOutcome;

/// The storage engine that owns reference copies.
///
/// Implementations provide their own concurrency control and make save,
/// refresh and purge idempotent: duplicate and out-of-order delivery is
/// resolved here, not in the dispatcher.
///
/// Also implemented for `Arc<S>` so a store can be shared for assertions.
#[async_trait]
pub trait ReferenceCopyStore: Send + Sync {
    async fn save_entity_reference_copy(&self, source: &str, entity: &EntityDetail) -> Result<()>;

    async fn save_relationship_reference_copy(
        &self,
        source: &str,
        relationship: &Relationship,
    ) -> Result<()>;

    /// Re-send an entity to the collection that asked for it. The home
    /// collection is the instance's owner; `requested_by` is the requester.
    async fn refresh_entity_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
        requested_by: &str,
    ) -> Result<()>;

    async fn refresh_relationship_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
        requested_by: &str,
    ) -> Result<()>;

    /// Remove any reference copy for the entity. A no-op if none exists.
    async fn purge_entity_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
    ) -> Result<()>;

    async fn purge_relationship_reference_copy(
        &self,
        source: &str,
        instance_guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_collection_id: &str,
    ) -> Result<()>;

    /// Save a batch atomically. The store filters individual members.
    async fn save_instance_reference_copies(&self, source: &str, graph: &InstanceGraph)
        -> Result<()>;

    async fn is_entity_known(&self, source: &str, guid: &str) -> Result<Option<EntitySummary>>;

    async fn is_relationship_known(&self, source: &str, guid: &str) -> Result<Option<Relationship>>;
}

/// Durable record of per-event failures. Must not fail and must not block
/// for long: it runs inline on the dispatch path.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Receives identity and type conflicts. Record only; resolution is a
/// cohort-wide protocol outside this engine.
pub trait ConflictReporter: Send + Sync {
    fn report(&self, report: ConflictReport);
}

/// One entry point per instance event kind.
///
/// All methods are fire-and-forget: the returned outcome is informational and
/// no failure ever reaches the caller.
#[async_trait]
pub trait InstanceEventProcessor: Send + Sync {
    // --- entities ---

    async fn process_new_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome;

    async fn process_updated_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_entity: Option<&EntityDetail>,
        entity: &EntityDetail,
    ) -> DispatchOutcome;

    async fn process_undone_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome;

    async fn process_classified_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
        classification: Option<&Classification>,
    ) -> DispatchOutcome;

    async fn process_declassified_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
        original_classification: Option<&Classification>,
    ) -> DispatchOutcome;

    async fn process_reclassified_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
        original_classification: Option<&Classification>,
        classification: Option<&Classification>,
    ) -> DispatchOutcome;

    async fn process_deleted_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome;

    async fn process_purged_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
    ) -> DispatchOutcome;

    async fn process_delete_purged_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome;

    async fn process_restored_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome;

    async fn process_reidentified_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_entity_guid: &str,
        entity: &EntityDetail,
    ) -> DispatchOutcome;

    async fn process_retyped_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_type_def_summary: &TypeDefSummary,
        entity: &EntityDetail,
    ) -> DispatchOutcome;

    async fn process_rehomed_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_home_metadata_collection_id: &str,
        entity: &EntityDetail,
    ) -> DispatchOutcome;

    async fn process_refresh_entity_requested(
        &self,
        source: &str,
        originator: &EventOriginator,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
        home_metadata_collection_id: &str,
    ) -> DispatchOutcome;

    async fn process_refreshed_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome;

    // --- relationships ---

    async fn process_new_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome;

    async fn process_updated_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_relationship: Option<&Relationship>,
        relationship: &Relationship,
    ) -> DispatchOutcome;

    async fn process_undone_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome;

    async fn process_deleted_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome;

    async fn process_purged_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
    ) -> DispatchOutcome;

    async fn process_delete_purged_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome;

    async fn process_restored_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome;

    async fn process_reidentified_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_relationship_guid: &str,
        relationship: &Relationship,
    ) -> DispatchOutcome;

    async fn process_retyped_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_type_def_summary: &TypeDefSummary,
        relationship: &Relationship,
    ) -> DispatchOutcome;

    async fn process_rehomed_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_home_metadata_collection_id: &str,
        relationship: &Relationship,
    ) -> DispatchOutcome;

    async fn process_refresh_relationship_requested(
        &self,
        source: &str,
        originator: &EventOriginator,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
        home_metadata_collection_id: &str,
    ) -> DispatchOutcome;

    async fn process_refreshed_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome;

    // --- batches and errors ---

    async fn process_instance_batch_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        instances: &InstanceGraph,
    ) -> DispatchOutcome;

    async fn process_conflicting_instances_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        target: &ConflictSide,
        other: &ConflictSide,
        error_message: &str,
    ) -> DispatchOutcome;

    async fn process_conflicting_type_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        target_metadata_collection_id: &str,
        target_instance_guid: &str,
        target_type_def_summary: &TypeDefSummary,
        other_type_def_summary: &TypeDefSummary,
        error_message: &str,
    ) -> DispatchOutcome;
}
