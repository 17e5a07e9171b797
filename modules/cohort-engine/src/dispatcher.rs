//! Instance event dispatch.
//!
//! Classify → validate → filter → store. Every event is handled in isolation:
//! a failure is audited and swallowed so the next event always runs.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use cohort_core::{
    ConfigError, ExchangeRuleEngine, FileConfig, InstanceValidator, ReplicationError,
    ReplicationResult,
};
use cohort_instances::{
    Classification, ConflictSide, EntityDetail, EventOriginator, InstanceEvent,
    InstanceEventError, InstanceEventMessage, InstanceGraph, InstanceHeader, MessageDecodeError,
    Relationship, TypeDefSummary,
};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::audit::{AuditRecord, TracingAuditSink};
use crate::conflict::{Conflict, ConflictReport, LoggingConflictReporter};
use crate::retrieval::RetrievalProcessor;
use crate::traits::{
    AuditSink, ConflictReporter, InstanceEventProcessor, ReferenceCopyStore,
};

/// What happened to one event. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchOutcome {
    /// The store was called.
    Applied,
    /// Policy or type activity declined the instance.
    Filtered,
    /// A reference copy already exists; nothing to learn.
    AlreadyKnown,
    /// Unparseable, foreign, or of a kind that needs no action.
    Ignored,
    ConflictRecorded,
    /// Failed and audited.
    Failed,
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Applied => write!(f, "applied"),
            DispatchOutcome::Filtered => write!(f, "filtered"),
            DispatchOutcome::AlreadyKnown => write!(f, "already_known"),
            DispatchOutcome::Ignored => write!(f, "ignored"),
            DispatchOutcome::ConflictRecorded => write!(f, "conflict_recorded"),
            DispatchOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Who this repository is within the cohort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub local_collection_id: String,
    pub local_server_name: String,
    pub repository_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Category {
    Entity,
    Relationship,
}

pub(crate) enum ReferenceInstance<'a> {
    Entity(&'a EntityDetail),
    Relationship(&'a Relationship),
}

impl ReferenceInstance<'_> {
    fn header(&self) -> &InstanceHeader {
        match self {
            ReferenceInstance::Entity(entity) => &entity.header,
            ReferenceInstance::Relationship(relationship) => &relationship.header,
        }
    }

    fn param_name(&self) -> &'static str {
        match self {
            ReferenceInstance::Entity(_) => "entity",
            ReferenceInstance::Relationship(_) => "relationship",
        }
    }
}

// ---------------------------------------------------------------------------
// Shared engine context
// ---------------------------------------------------------------------------

/// Validated, immutable wiring shared by the dispatcher and the retrieval
/// processor.
pub(crate) struct EngineContext {
    pub(crate) identity: LocalIdentity,
    pub(crate) store: Arc<dyn ReferenceCopyStore>,
    pub(crate) validator: Arc<dyn InstanceValidator>,
    pub(crate) exchange_rule: Arc<dyn ExchangeRuleEngine>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) conflicts: Arc<dyn ConflictReporter>,
}

impl EngineContext {
    /// The single failure boundary. Errors and panics inside `step` are
    /// audited and turned into `Failed`.
    pub(crate) async fn guarded<F>(
        &self,
        method: &'static str,
        source: &str,
        originator: &EventOriginator,
        step: F,
    ) -> DispatchOutcome
    where
        F: Future<Output = ReplicationResult<DispatchOutcome>>,
    {
        match AssertUnwindSafe(step).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => self.fail(method, source, originator, error.to_string()),
            Err(panic) => self.fail(method, source, originator, panic_message(&*panic)),
        }
    }

    fn fail(
        &self,
        method: &'static str,
        source: &str,
        originator: &EventOriginator,
        error: String,
    ) -> DispatchOutcome {
        warn!(
            method,
            source,
            originator_server = originator.server(),
            originator_collection_id = originator.collection_id(),
            error = error.as_str(),
            "Instance event dropped"
        );
        self.audit
            .record(AuditRecord::new(method, source, originator, error));
        DispatchOutcome::Failed
    }

    async fn update_reference(
        &self,
        source: &str,
        method: &'static str,
        instance: ReferenceInstance<'_>,
    ) -> ReplicationResult<DispatchOutcome> {
        let header = instance.header();
        self.validator.validate_reference_instance_header(
            &self.identity.repository_name,
            &self.identity.local_collection_id,
            instance.param_name(),
            header,
            method,
        )?;

        if !self.exchange_rule.should_save(source, header) {
            return Ok(DispatchOutcome::Filtered);
        }

        match instance {
            ReferenceInstance::Entity(entity) => self
                .store
                .save_entity_reference_copy(source, entity)
                .await
                .map_err(|e| ReplicationError::store("save_entity_reference_copy", e))?,
            ReferenceInstance::Relationship(relationship) => self
                .store
                .save_relationship_reference_copy(source, relationship)
                .await
                .map_err(|e| ReplicationError::store("save_relationship_reference_copy", e))?,
        }

        debug!(
            source,
            method,
            guid = header.guid.as_str(),
            version = header.version,
            "Saved reference copy"
        );
        Ok(DispatchOutcome::Applied)
    }

    async fn purge_reference(
        &self,
        source: &str,
        category: Category,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
        home_collection_id: &str,
    ) -> ReplicationResult<DispatchOutcome> {
        if instance_guid.trim().is_empty() {
            return Err(ReplicationError::Malformed(
                "purge names no instance GUID".to_string(),
            ));
        }

        match category {
            Category::Entity => self
                .store
                .purge_entity_reference_copy(
                    source,
                    instance_guid,
                    type_def_guid,
                    type_def_name,
                    home_collection_id,
                )
                .await
                .map_err(|e| ReplicationError::store("purge_entity_reference_copy", e))?,
            Category::Relationship => self
                .store
                .purge_relationship_reference_copy(
                    source,
                    instance_guid,
                    type_def_guid,
                    type_def_name,
                    home_collection_id,
                )
                .await
                .map_err(|e| ReplicationError::store("purge_relationship_reference_copy", e))?,
        }

        debug!(source, guid = instance_guid, "Purged reference copy");
        Ok(DispatchOutcome::Applied)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn refresh_reference(
        &self,
        source: &str,
        category: Category,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
        home_collection_id: &str,
        requested_by: &str,
    ) -> ReplicationResult<DispatchOutcome> {
        match category {
            Category::Entity => self
                .store
                .refresh_entity_reference_copy(
                    source,
                    instance_guid,
                    type_def_guid,
                    type_def_name,
                    home_collection_id,
                    requested_by,
                )
                .await
                .map_err(|e| ReplicationError::store("refresh_entity_reference_copy", e))?,
            Category::Relationship => self
                .store
                .refresh_relationship_reference_copy(
                    source,
                    instance_guid,
                    type_def_guid,
                    type_def_name,
                    home_collection_id,
                    requested_by,
                )
                .await
                .map_err(|e| ReplicationError::store("refresh_relationship_reference_copy", e))?,
        }
        Ok(DispatchOutcome::Applied)
    }

    async fn save_batch(
        &self,
        source: &str,
        instances: &InstanceGraph,
    ) -> ReplicationResult<DispatchOutcome> {
        if instances.is_empty() {
            debug!(source, "Empty instance batch");
            return Ok(DispatchOutcome::Ignored);
        }
        self.store
            .save_instance_reference_copies(source, instances)
            .await
            .map_err(|e| ReplicationError::store("save_instance_reference_copies", e))?;
        debug!(
            source,
            entities = instances.entities.len(),
            relationships = instances.relationships.len(),
            "Passed instance batch to store"
        );
        Ok(DispatchOutcome::Applied)
    }
}

/// The home collection for a purge: the originator, which must say who it is.
fn originator_collection(originator: &EventOriginator) -> ReplicationResult<&str> {
    originator
        .metadata_collection_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            ReplicationError::Malformed("originator has no metadata collection id".to_string())
        })
}

/// Identity of a delete-purged instance, taken from its own header.
fn purge_identity<'a>(
    header: &'a InstanceHeader,
    originator: &'a EventOriginator,
) -> ReplicationResult<(&'a str, &'a str, &'a str)> {
    let instance_type = header.instance_type.as_ref().ok_or_else(|| {
        ReplicationError::Malformed(format!("instance {} has no type", header.guid))
    })?;
    let home = match header.home_collection_id() {
        Some(home) => home,
        None => originator_collection(originator)?,
    };
    Ok((
        instance_type.type_def_guid.as_str(),
        instance_type.type_def_name.as_str(),
        home,
    ))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with non-string payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects the dispatcher's wiring. `build` refuses incomplete wiring so a
/// mis-configured process fails at startup rather than on every event.
#[derive(Default)]
pub struct DispatcherBuilder {
    local_collection_id: Option<String>,
    local_server_name: Option<String>,
    repository_name: Option<String>,
    store: Option<Arc<dyn ReferenceCopyStore>>,
    validator: Option<Arc<dyn InstanceValidator>>,
    exchange_rule: Option<Arc<dyn ExchangeRuleEngine>>,
    audit: Option<Arc<dyn AuditSink>>,
    conflicts: Option<Arc<dyn ConflictReporter>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the identity section of a loaded config.
    pub fn from_config(config: &FileConfig) -> Self {
        Self::new()
            .local_collection_id(config.identity.local_collection_id.clone())
            .local_server_name(config.identity.server_name.clone())
            .repository_name(config.identity.repository_name.clone())
    }

    pub fn local_collection_id(mut self, id: impl Into<String>) -> Self {
        self.local_collection_id = Some(id.into());
        self
    }

    pub fn local_server_name(mut self, name: impl Into<String>) -> Self {
        self.local_server_name = Some(name.into());
        self
    }

    pub fn repository_name(mut self, name: impl Into<String>) -> Self {
        self.repository_name = Some(name.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn ReferenceCopyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn InstanceValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn exchange_rule(mut self, rule: Arc<dyn ExchangeRuleEngine>) -> Self {
        self.exchange_rule = Some(rule);
        self
    }

    /// Defaults to [`TracingAuditSink`].
    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Defaults to [`LoggingConflictReporter`].
    pub fn conflict_reporter(mut self, conflicts: Arc<dyn ConflictReporter>) -> Self {
        self.conflicts = Some(conflicts);
        self
    }

    pub fn build(self) -> Result<ReferenceCopyDispatcher, ConfigError> {
        let identity = LocalIdentity {
            local_collection_id: required(self.local_collection_id, "local_collection_id")?,
            local_server_name: required(self.local_server_name, "local_server_name")?,
            repository_name: required(self.repository_name, "repository_name")?,
        };
        let context = EngineContext {
            identity,
            store: self.store.ok_or(ConfigError::Missing("store"))?,
            validator: self.validator.ok_or(ConfigError::Missing("validator"))?,
            exchange_rule: self
                .exchange_rule
                .ok_or(ConfigError::Missing("exchange_rule"))?,
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            conflicts: self
                .conflicts
                .unwrap_or_else(|| Arc::new(LoggingConflictReporter)),
        };

        info!(
            local_collection_id = context.identity.local_collection_id.as_str(),
            server = context.identity.local_server_name.as_str(),
            repository = context.identity.repository_name.as_str(),
            "Reference copy dispatcher ready"
        );
        Ok(ReferenceCopyDispatcher {
            context: Arc::new(context),
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(field)),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes inbound instance events to reference copy lifecycle actions.
///
/// Stateless apart from its wiring: safe to share behind an `Arc` across
/// transport workers. Cheap to clone.
#[derive(Clone)]
pub struct ReferenceCopyDispatcher {
    context: Arc<EngineContext>,
}

impl ReferenceCopyDispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.context.identity
    }

    /// A retrieval processor sharing this dispatcher's wiring.
    pub fn retrieval_processor(&self) -> RetrievalProcessor {
        RetrievalProcessor::from_context(self.context.clone())
    }

    /// Dispatch one message from the transport. Never fails.
    pub async fn dispatch(&self, source: &str, message: InstanceEventMessage) -> DispatchOutcome {
        let InstanceEventMessage { originator, event } = message;
        let Some(event) = event else {
            debug!(source, "Dropping instance event message with no event");
            return DispatchOutcome::Ignored;
        };
        let Some(originator) = originator else {
            debug!(
                source,
                event_type = event.event_type(),
                "Dropping instance event with no originator"
            );
            return DispatchOutcome::Ignored;
        };
        self.dispatch_event(source, &originator, &event).await
    }

    /// Decode and dispatch a JSON-encoded message. Input with no readable
    /// originator or event kind is treated as foreign and dropped; a broken
    /// body from a known originator is audited.
    pub async fn dispatch_json(&self, source: &str, raw: &str) -> DispatchOutcome {
        match InstanceEventMessage::decode(raw) {
            Ok(message) => self.dispatch(source, message).await,
            Err(MessageDecodeError::Event {
                originator,
                event_type,
                error,
            }) => self.context.fail(
                "dispatch_json",
                source,
                &originator,
                format!("malformed {event_type} payload: {error}"),
            ),
            Err(e) => {
                debug!(source, error = %e, "Dropping undecodable instance event");
                DispatchOutcome::Ignored
            }
        }
    }

    /// Route an already-decoded event to its entry point.
    pub async fn dispatch_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        event: &InstanceEvent,
    ) -> DispatchOutcome {
        match event {
            InstanceEvent::NewEntity { entity } => {
                self.process_new_entity_event(source, originator, entity).await
            }
            InstanceEvent::UpdatedEntity {
                original_entity,
                entity,
            } => {
                self.process_updated_entity_event(
                    source,
                    originator,
                    original_entity.as_ref(),
                    entity,
                )
                .await
            }
            InstanceEvent::UndoneEntity { entity } => {
                self.process_undone_entity_event(source, originator, entity).await
            }
            InstanceEvent::ClassifiedEntity {
                entity,
                classification,
            } => {
                self.process_classified_entity_event(
                    source,
                    originator,
                    entity,
                    classification.as_ref(),
                )
                .await
            }
            InstanceEvent::DeclassifiedEntity {
                entity,
                original_classification,
            } => {
                self.process_declassified_entity_event(
                    source,
                    originator,
                    entity,
                    original_classification.as_ref(),
                )
                .await
            }
            InstanceEvent::ReclassifiedEntity {
                entity,
                original_classification,
                classification,
            } => {
                self.process_reclassified_entity_event(
                    source,
                    originator,
                    entity,
                    original_classification.as_ref(),
                    classification.as_ref(),
                )
                .await
            }
            InstanceEvent::DeletedEntity { entity } => {
                self.process_deleted_entity_event(source, originator, entity).await
            }
            InstanceEvent::PurgedEntity {
                type_def_guid,
                type_def_name,
                instance_guid,
            } => {
                self.process_purged_entity_event(
                    source,
                    originator,
                    type_def_guid,
                    type_def_name,
                    instance_guid,
                )
                .await
            }
            InstanceEvent::DeletePurgedEntity { entity } => {
                self.process_delete_purged_entity_event(source, originator, entity)
                    .await
            }
            InstanceEvent::RestoredEntity { entity } => {
                self.process_restored_entity_event(source, originator, entity).await
            }
            InstanceEvent::ReidentifiedEntity {
                original_entity_guid,
                entity,
            } => {
                self.process_reidentified_entity_event(
                    source,
                    originator,
                    original_entity_guid,
                    entity,
                )
                .await
            }
            InstanceEvent::RetypedEntity {
                original_type_def_summary,
                entity,
            } => {
                self.process_retyped_entity_event(
                    source,
                    originator,
                    original_type_def_summary,
                    entity,
                )
                .await
            }
            InstanceEvent::RehomedEntity {
                original_home_metadata_collection_id,
                entity,
            } => {
                self.process_rehomed_entity_event(
                    source,
                    originator,
                    original_home_metadata_collection_id,
                    entity,
                )
                .await
            }
            InstanceEvent::RefreshEntityRequest {
                type_def_guid,
                type_def_name,
                instance_guid,
                home_metadata_collection_id,
            } => {
                self.process_refresh_entity_requested(
                    source,
                    originator,
                    type_def_guid,
                    type_def_name,
                    instance_guid,
                    home_metadata_collection_id,
                )
                .await
            }
            InstanceEvent::RefreshedEntity { entity } => {
                self.process_refreshed_entity_event(source, originator, entity)
                    .await
            }
            InstanceEvent::NewRelationship { relationship } => {
                self.process_new_relationship_event(source, originator, relationship)
                    .await
            }
            InstanceEvent::UpdatedRelationship {
                original_relationship,
                relationship,
            } => {
                self.process_updated_relationship_event(
                    source,
                    originator,
                    original_relationship.as_ref(),
                    relationship,
                )
                .await
            }
            InstanceEvent::UndoneRelationship { relationship } => {
                self.process_undone_relationship_event(source, originator, relationship)
                    .await
            }
            InstanceEvent::DeletedRelationship { relationship } => {
                self.process_deleted_relationship_event(source, originator, relationship)
                    .await
            }
            InstanceEvent::PurgedRelationship {
                type_def_guid,
                type_def_name,
                instance_guid,
            } => {
                self.process_purged_relationship_event(
                    source,
                    originator,
                    type_def_guid,
                    type_def_name,
                    instance_guid,
                )
                .await
            }
            InstanceEvent::DeletePurgedRelationship { relationship } => {
                self.process_delete_purged_relationship_event(source, originator, relationship)
                    .await
            }
            InstanceEvent::RestoredRelationship { relationship } => {
                self.process_restored_relationship_event(source, originator, relationship)
                    .await
            }
            InstanceEvent::ReidentifiedRelationship {
                original_relationship_guid,
                relationship,
            } => {
                self.process_reidentified_relationship_event(
                    source,
                    originator,
                    original_relationship_guid,
                    relationship,
                )
                .await
            }
            InstanceEvent::RetypedRelationship {
                original_type_def_summary,
                relationship,
            } => {
                self.process_retyped_relationship_event(
                    source,
                    originator,
                    original_type_def_summary,
                    relationship,
                )
                .await
            }
            InstanceEvent::RehomedRelationship {
                original_home_metadata_collection_id,
                relationship,
            } => {
                self.process_rehomed_relationship_event(
                    source,
                    originator,
                    original_home_metadata_collection_id,
                    relationship,
                )
                .await
            }
            InstanceEvent::RefreshRelationshipRequest {
                type_def_guid,
                type_def_name,
                instance_guid,
                home_metadata_collection_id,
            } => {
                self.process_refresh_relationship_requested(
                    source,
                    originator,
                    type_def_guid,
                    type_def_name,
                    instance_guid,
                    home_metadata_collection_id,
                )
                .await
            }
            InstanceEvent::RefreshedRelationship { relationship } => {
                self.process_refreshed_relationship_event(source, originator, relationship)
                    .await
            }
            InstanceEvent::InstanceBatch { instances } => {
                self.process_instance_batch_event(source, originator, instances)
                    .await
            }
            InstanceEvent::InstanceError { error } => match error {
                InstanceEventError::ConflictingInstances {
                    target,
                    other,
                    error_message,
                } => {
                    self.process_conflicting_instances_event(
                        source,
                        originator,
                        target,
                        other,
                        error_message,
                    )
                    .await
                }
                InstanceEventError::ConflictingType {
                    target_metadata_collection_id,
                    target_instance_guid,
                    target_type_def_summary,
                    other_type_def_summary,
                    error_message,
                } => {
                    self.process_conflicting_type_event(
                        source,
                        originator,
                        target_metadata_collection_id,
                        target_instance_guid,
                        target_type_def_summary,
                        other_type_def_summary,
                        error_message,
                    )
                    .await
                }
                other => {
                    info!(
                        source,
                        originator = originator.server(),
                        error_code = other.code(),
                        "Ignoring instance error event"
                    );
                    DispatchOutcome::Ignored
                }
            },
            InstanceEvent::Unknown => {
                info!(
                    source,
                    originator = originator.server(),
                    "Ignoring unrecognized instance event kind"
                );
                DispatchOutcome::Ignored
            }
        }
    }

    async fn upsert(
        &self,
        method: &'static str,
        source: &str,
        originator: &EventOriginator,
        instance: ReferenceInstance<'_>,
    ) -> DispatchOutcome {
        let context = &self.context;
        context
            .guarded(
                method,
                source,
                originator,
                context.update_reference(source, method, instance),
            )
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn purge(
        &self,
        method: &'static str,
        source: &str,
        originator: &EventOriginator,
        category: Category,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
    ) -> DispatchOutcome {
        let context = &self.context;
        context
            .guarded(method, source, originator, async {
                let home = originator_collection(originator)?;
                context
                    .purge_reference(
                        source,
                        category,
                        type_def_guid,
                        type_def_name,
                        instance_guid,
                        home,
                    )
                    .await
            })
            .await
    }

    async fn delete_purge(
        &self,
        method: &'static str,
        source: &str,
        originator: &EventOriginator,
        category: Category,
        header: &InstanceHeader,
    ) -> DispatchOutcome {
        let context = &self.context;
        context
            .guarded(method, source, originator, async {
                let (type_def_guid, type_def_name, home) = purge_identity(header, originator)?;
                context
                    .purge_reference(
                        source,
                        category,
                        type_def_guid,
                        type_def_name,
                        &header.guid,
                        home,
                    )
                    .await
            })
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn refresh_request(
        &self,
        method: &'static str,
        source: &str,
        originator: &EventOriginator,
        category: Category,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
        home_metadata_collection_id: &str,
    ) -> DispatchOutcome {
        let context = &self.context;
        context
            .guarded(method, source, originator, async {
                if instance_guid.trim().is_empty() {
                    return Err(ReplicationError::Malformed(
                        "refresh request names no instance GUID".to_string(),
                    ));
                }
                let requested_by = originator_collection(originator)?;
                debug!(
                    source,
                    guid = instance_guid,
                    home = home_metadata_collection_id,
                    requested_by,
                    "Refresh requested"
                );
                context
                    .refresh_reference(
                        source,
                        category,
                        type_def_guid,
                        type_def_name,
                        instance_guid,
                        home_metadata_collection_id,
                        requested_by,
                    )
                    .await
            })
            .await
    }

    async fn record_conflict(
        &self,
        method: &'static str,
        source: &str,
        originator: &EventOriginator,
        conflict: Conflict,
    ) -> DispatchOutcome {
        let context = &self.context;
        context
            .guarded(method, source, originator, async {
                context
                    .conflicts
                    .report(ConflictReport::new(source, originator, conflict));
                Ok::<_, ReplicationError>(DispatchOutcome::ConflictRecorded)
            })
            .await
    }
}

#[async_trait]
impl InstanceEventProcessor for ReferenceCopyDispatcher {
    // --- entities ---

    async fn process_new_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        self.upsert(
            "process_new_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_updated_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        _original_entity: Option<&EntityDetail>,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        self.upsert(
            "process_updated_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_undone_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        self.upsert(
            "process_undone_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_classified_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
        _classification: Option<&Classification>,
    ) -> DispatchOutcome {
        self.upsert(
            "process_classified_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_declassified_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
        _original_classification: Option<&Classification>,
    ) -> DispatchOutcome {
        self.upsert(
            "process_declassified_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_reclassified_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
        _original_classification: Option<&Classification>,
        _classification: Option<&Classification>,
    ) -> DispatchOutcome {
        self.upsert(
            "process_reclassified_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_deleted_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        self.upsert(
            "process_deleted_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_purged_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
    ) -> DispatchOutcome {
        self.purge(
            "process_purged_entity_event",
            source,
            originator,
            Category::Entity,
            type_def_guid,
            type_def_name,
            instance_guid,
        )
        .await
    }

    async fn process_delete_purged_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        self.delete_purge(
            "process_delete_purged_entity_event",
            source,
            originator,
            Category::Entity,
            &entity.header,
        )
        .await
    }

    async fn process_restored_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        self.upsert(
            "process_restored_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_reidentified_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_entity_guid: &str,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        debug!(
            source,
            original_guid = original_entity_guid,
            guid = entity.header.guid.as_str(),
            "Entity re-identified"
        );
        self.upsert(
            "process_reidentified_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_retyped_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_type_def_summary: &TypeDefSummary,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        debug!(
            source,
            guid = entity.header.guid.as_str(),
            original_type = %original_type_def_summary,
            "Entity re-typed"
        );
        self.upsert(
            "process_retyped_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_rehomed_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_home_metadata_collection_id: &str,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        debug!(
            source,
            guid = entity.header.guid.as_str(),
            original_home = original_home_metadata_collection_id,
            "Entity re-homed"
        );
        self.upsert(
            "process_rehomed_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    async fn process_refresh_entity_requested(
        &self,
        source: &str,
        originator: &EventOriginator,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
        home_metadata_collection_id: &str,
    ) -> DispatchOutcome {
        self.refresh_request(
            "process_refresh_entity_requested",
            source,
            originator,
            Category::Entity,
            type_def_guid,
            type_def_name,
            instance_guid,
            home_metadata_collection_id,
        )
        .await
    }

    async fn process_refreshed_entity_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        entity: &EntityDetail,
    ) -> DispatchOutcome {
        self.upsert(
            "process_refreshed_entity_event",
            source,
            originator,
            ReferenceInstance::Entity(entity),
        )
        .await
    }

    // --- relationships ---

    async fn process_new_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        self.upsert(
            "process_new_relationship_event",
            source,
            originator,
            ReferenceInstance::Relationship(relationship),
        )
        .await
    }

    async fn process_updated_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        _original_relationship: Option<&Relationship>,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        self.upsert(
            "process_updated_relationship_event",
            source,
            originator,
            ReferenceInstance::Relationship(relationship),
        )
        .await
    }

    async fn process_undone_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        self.upsert(
            "process_undone_relationship_event",
            source,
            originator,
            ReferenceInstance::Relationship(relationship),
        )
        .await
    }

    async fn process_deleted_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        self.upsert(
            "process_deleted_relationship_event",
            source,
            originator,
            ReferenceInstance::Relationship(relationship),
        )
        .await
    }

    async fn process_purged_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
    ) -> DispatchOutcome {
        self.purge(
            "process_purged_relationship_event",
            source,
            originator,
            Category::Relationship,
            type_def_guid,
            type_def_name,
            instance_guid,
        )
        .await
    }

    async fn process_delete_purged_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        self.delete_purge(
            "process_delete_purged_relationship_event",
            source,
            originator,
            Category::Relationship,
            &relationship.header,
        )
        .await
    }

    async fn process_restored_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        self.upsert(
            "process_restored_relationship_event",
            source,
            originator,
            ReferenceInstance::Relationship(relationship),
        )
        .await
    }

    async fn process_reidentified_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_relationship_guid: &str,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        debug!(
            source,
            original_guid = original_relationship_guid,
            guid = relationship.header.guid.as_str(),
            "Relationship re-identified"
        );
        self.upsert(
            "process_reidentified_relationship_event",
            source,
            originator,
            ReferenceInstance::Relationship(relationship),
        )
        .await
    }

    async fn process_retyped_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_type_def_summary: &TypeDefSummary,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        debug!(
            source,
            guid = relationship.header.guid.as_str(),
            original_type = %original_type_def_summary,
            "Relationship re-typed"
        );
        self.upsert(
            "process_retyped_relationship_event",
            source,
            originator,
            ReferenceInstance::Relationship(relationship),
        )
        .await
    }

    async fn process_rehomed_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        original_home_metadata_collection_id: &str,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        debug!(
            source,
            guid = relationship.header.guid.as_str(),
            original_home = original_home_metadata_collection_id,
            "Relationship re-homed"
        );
        self.upsert(
            "process_rehomed_relationship_event",
            source,
            originator,
            ReferenceInstance::Relationship(relationship),
        )
        .await
    }

    async fn process_refresh_relationship_requested(
        &self,
        source: &str,
        originator: &EventOriginator,
        type_def_guid: &str,
        type_def_name: &str,
        instance_guid: &str,
        home_metadata_collection_id: &str,
    ) -> DispatchOutcome {
        self.refresh_request(
            "process_refresh_relationship_requested",
            source,
            originator,
            Category::Relationship,
            type_def_guid,
            type_def_name,
            instance_guid,
            home_metadata_collection_id,
        )
        .await
    }

    async fn process_refreshed_relationship_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        relationship: &Relationship,
    ) -> DispatchOutcome {
        self.upsert(
            "process_refreshed_relationship_event",
            source,
            originator,
            ReferenceInstance::Relationship(relationship),
        )
        .await
    }

    // --- batches and errors ---

    async fn process_instance_batch_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        instances: &InstanceGraph,
    ) -> DispatchOutcome {
        let context = &self.context;
        context
            .guarded(
                "process_instance_batch_event",
                source,
                originator,
                context.save_batch(source, instances),
            )
            .await
    }

    async fn process_conflicting_instances_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        target: &ConflictSide,
        other: &ConflictSide,
        error_message: &str,
    ) -> DispatchOutcome {
        self.record_conflict(
            "process_conflicting_instances_event",
            source,
            originator,
            Conflict::Instance {
                target: target.clone(),
                other: other.clone(),
                message: error_message.to_string(),
            },
        )
        .await
    }

    async fn process_conflicting_type_event(
        &self,
        source: &str,
        originator: &EventOriginator,
        target_metadata_collection_id: &str,
        target_instance_guid: &str,
        target_type_def_summary: &TypeDefSummary,
        other_type_def_summary: &TypeDefSummary,
        error_message: &str,
    ) -> DispatchOutcome {
        self.record_conflict(
            "process_conflicting_type_event",
            source,
            originator,
            Conflict::Type {
                target_metadata_collection_id: target_metadata_collection_id.to_string(),
                target_instance_guid: target_instance_guid.to_string(),
                target_type: target_type_def_summary.clone(),
                other_type: other_type_def_summary.clone(),
                message: error_message.to_string(),
            },
        )
        .await
    }
}
