//! The instance event taxonomy.
//!
//! Every legal mutation of a cohort-replicated instance has exactly one
//! variant here. Each variant carries only the payload its kind needs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{
    Classification, EntityDetail, EventOriginator, InstanceGraph, InstanceHeader,
    InstanceProvenance, Relationship, TypeDefSummary,
};

/// A change notification about one instance (or a batch of them).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum InstanceEvent {
    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------
    NewEntity {
        entity: EntityDetail,
    },
    UpdatedEntity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_entity: Option<EntityDetail>,
        entity: EntityDetail,
    },
    UndoneEntity {
        entity: EntityDetail,
    },
    ClassifiedEntity {
        entity: EntityDetail,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        classification: Option<Classification>,
    },
    DeclassifiedEntity {
        entity: EntityDetail,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_classification: Option<Classification>,
    },
    ReclassifiedEntity {
        entity: EntityDetail,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_classification: Option<Classification>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        classification: Option<Classification>,
    },
    DeletedEntity {
        entity: EntityDetail,
    },
    PurgedEntity {
        type_def_guid: String,
        type_def_name: String,
        instance_guid: String,
    },
    /// Delete and purge in a single step.
    DeletePurgedEntity {
        entity: EntityDetail,
    },
    RestoredEntity {
        entity: EntityDetail,
    },
    ReidentifiedEntity {
        original_entity_guid: String,
        entity: EntityDetail,
    },
    RetypedEntity {
        original_type_def_summary: TypeDefSummary,
        entity: EntityDetail,
    },
    RehomedEntity {
        original_home_metadata_collection_id: String,
        entity: EntityDetail,
    },
    RefreshEntityRequest {
        type_def_guid: String,
        type_def_name: String,
        instance_guid: String,
        home_metadata_collection_id: String,
    },
    RefreshedEntity {
        entity: EntityDetail,
    },

    // -----------------------------------------------------------------------
    // Relationships
    // -----------------------------------------------------------------------
    NewRelationship {
        relationship: Relationship,
    },
    UpdatedRelationship {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_relationship: Option<Relationship>,
        relationship: Relationship,
    },
    UndoneRelationship {
        relationship: Relationship,
    },
    DeletedRelationship {
        relationship: Relationship,
    },
    PurgedRelationship {
        type_def_guid: String,
        type_def_name: String,
        instance_guid: String,
    },
    DeletePurgedRelationship {
        relationship: Relationship,
    },
    RestoredRelationship {
        relationship: Relationship,
    },
    ReidentifiedRelationship {
        original_relationship_guid: String,
        relationship: Relationship,
    },
    RetypedRelationship {
        original_type_def_summary: TypeDefSummary,
        relationship: Relationship,
    },
    RehomedRelationship {
        original_home_metadata_collection_id: String,
        relationship: Relationship,
    },
    RefreshRelationshipRequest {
        type_def_guid: String,
        type_def_name: String,
        instance_guid: String,
        home_metadata_collection_id: String,
    },
    RefreshedRelationship {
        relationship: Relationship,
    },

    // -----------------------------------------------------------------------
    // Batches and errors
    // -----------------------------------------------------------------------
    InstanceBatch {
        instances: InstanceGraph,
    },
    InstanceError {
        error: InstanceEventError,
    },

    /// A kind this build does not know about. Kept so newer senders do not
    /// break older receivers.
    #[serde(other)]
    Unknown,
}

/// Error reports broadcast by cohort members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "error_code", rename_all = "snake_case")]
pub enum InstanceEventError {
    /// Two home repositories claim the same instance GUID.
    ConflictingInstances {
        target: ConflictSide,
        other: ConflictSide,
        #[serde(default)]
        error_message: String,
    },
    /// A received instance's type version disagrees with the stored one.
    ConflictingType {
        target_metadata_collection_id: String,
        target_instance_guid: String,
        target_type_def_summary: TypeDefSummary,
        other_type_def_summary: TypeDefSummary,
        #[serde(default)]
        error_message: String,
    },
    NotInUse,
    #[serde(other)]
    Unknown,
}

impl InstanceEventError {
    pub fn code(&self) -> &'static str {
        match self {
            InstanceEventError::ConflictingInstances { .. } => "conflicting_instances",
            InstanceEventError::ConflictingType { .. } => "conflicting_type",
            InstanceEventError::NotInUse => "not_in_use",
            InstanceEventError::Unknown => "unknown",
        }
    }
}

/// One side of an identity conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConflictSide {
    pub metadata_collection_id: String,
    #[serde(default)]
    pub provenance: InstanceProvenance,
    pub type_def_summary: TypeDefSummary,
    pub instance_guid: String,
}

// ---------------------------------------------------------------------------
// Kinds and families
// ---------------------------------------------------------------------------

/// Fieldless mirror of [`InstanceEvent`]'s tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceEventKind {
    NewEntity,
    UpdatedEntity,
    UndoneEntity,
    ClassifiedEntity,
    DeclassifiedEntity,
    ReclassifiedEntity,
    DeletedEntity,
    PurgedEntity,
    DeletePurgedEntity,
    RestoredEntity,
    ReidentifiedEntity,
    RetypedEntity,
    RehomedEntity,
    RefreshEntityRequest,
    RefreshedEntity,
    NewRelationship,
    UpdatedRelationship,
    UndoneRelationship,
    DeletedRelationship,
    PurgedRelationship,
    DeletePurgedRelationship,
    RestoredRelationship,
    ReidentifiedRelationship,
    RetypedRelationship,
    RehomedRelationship,
    RefreshRelationshipRequest,
    RefreshedRelationship,
    InstanceBatch,
    InstanceError,
    Unknown,
}

/// The lifecycle action a kind maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    Upsert,
    Purge,
    RefreshRequest,
    Batch,
    Error,
    Ignored,
}

impl InstanceEventKind {
    pub const ALL: [InstanceEventKind; 30] = [
        InstanceEventKind::NewEntity,
        InstanceEventKind::UpdatedEntity,
        InstanceEventKind::UndoneEntity,
        InstanceEventKind::ClassifiedEntity,
        InstanceEventKind::DeclassifiedEntity,
        InstanceEventKind::ReclassifiedEntity,
        InstanceEventKind::DeletedEntity,
        InstanceEventKind::PurgedEntity,
        InstanceEventKind::DeletePurgedEntity,
        InstanceEventKind::RestoredEntity,
        InstanceEventKind::ReidentifiedEntity,
        InstanceEventKind::RetypedEntity,
        InstanceEventKind::RehomedEntity,
        InstanceEventKind::RefreshEntityRequest,
        InstanceEventKind::RefreshedEntity,
        InstanceEventKind::NewRelationship,
        InstanceEventKind::UpdatedRelationship,
        InstanceEventKind::UndoneRelationship,
        InstanceEventKind::DeletedRelationship,
        InstanceEventKind::PurgedRelationship,
        InstanceEventKind::DeletePurgedRelationship,
        InstanceEventKind::RestoredRelationship,
        InstanceEventKind::ReidentifiedRelationship,
        InstanceEventKind::RetypedRelationship,
        InstanceEventKind::RehomedRelationship,
        InstanceEventKind::RefreshRelationshipRequest,
        InstanceEventKind::RefreshedRelationship,
        InstanceEventKind::InstanceBatch,
        InstanceEventKind::InstanceError,
        InstanceEventKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceEventKind::NewEntity => "new_entity",
            InstanceEventKind::UpdatedEntity => "updated_entity",
            InstanceEventKind::UndoneEntity => "undone_entity",
            InstanceEventKind::ClassifiedEntity => "classified_entity",
            InstanceEventKind::DeclassifiedEntity => "declassified_entity",
            InstanceEventKind::ReclassifiedEntity => "reclassified_entity",
            InstanceEventKind::DeletedEntity => "deleted_entity",
            InstanceEventKind::PurgedEntity => "purged_entity",
            InstanceEventKind::DeletePurgedEntity => "delete_purged_entity",
            InstanceEventKind::RestoredEntity => "restored_entity",
            InstanceEventKind::ReidentifiedEntity => "reidentified_entity",
            InstanceEventKind::RetypedEntity => "retyped_entity",
            InstanceEventKind::RehomedEntity => "rehomed_entity",
            InstanceEventKind::RefreshEntityRequest => "refresh_entity_request",
            InstanceEventKind::RefreshedEntity => "refreshed_entity",
            InstanceEventKind::NewRelationship => "new_relationship",
            InstanceEventKind::UpdatedRelationship => "updated_relationship",
            InstanceEventKind::UndoneRelationship => "undone_relationship",
            InstanceEventKind::DeletedRelationship => "deleted_relationship",
            InstanceEventKind::PurgedRelationship => "purged_relationship",
            InstanceEventKind::DeletePurgedRelationship => "delete_purged_relationship",
            InstanceEventKind::RestoredRelationship => "restored_relationship",
            InstanceEventKind::ReidentifiedRelationship => "reidentified_relationship",
            InstanceEventKind::RetypedRelationship => "retyped_relationship",
            InstanceEventKind::RehomedRelationship => "rehomed_relationship",
            InstanceEventKind::RefreshRelationshipRequest => "refresh_relationship_request",
            InstanceEventKind::RefreshedRelationship => "refreshed_relationship",
            InstanceEventKind::InstanceBatch => "instance_batch",
            InstanceEventKind::InstanceError => "instance_error",
            InstanceEventKind::Unknown => "unknown",
        }
    }

    pub fn family(&self) -> EventFamily {
        use InstanceEventKind::*;
        match self {
            NewEntity | UpdatedEntity | UndoneEntity | ClassifiedEntity | DeclassifiedEntity
            | ReclassifiedEntity | DeletedEntity | RestoredEntity | ReidentifiedEntity
            | RetypedEntity | RehomedEntity | RefreshedEntity | NewRelationship
            | UpdatedRelationship | UndoneRelationship | DeletedRelationship
            | RestoredRelationship | ReidentifiedRelationship | RetypedRelationship
            | RehomedRelationship | RefreshedRelationship => EventFamily::Upsert,
            PurgedEntity | DeletePurgedEntity | PurgedRelationship | DeletePurgedRelationship => {
                EventFamily::Purge
            }
            RefreshEntityRequest | RefreshRelationshipRequest => EventFamily::RefreshRequest,
            InstanceBatch => EventFamily::Batch,
            InstanceError => EventFamily::Error,
            Unknown => EventFamily::Ignored,
        }
    }
}

impl std::fmt::Display for InstanceEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl InstanceEvent {
    pub fn kind(&self) -> InstanceEventKind {
        match self {
            InstanceEvent::NewEntity { .. } => InstanceEventKind::NewEntity,
            InstanceEvent::UpdatedEntity { .. } => InstanceEventKind::UpdatedEntity,
            InstanceEvent::UndoneEntity { .. } => InstanceEventKind::UndoneEntity,
            InstanceEvent::ClassifiedEntity { .. } => InstanceEventKind::ClassifiedEntity,
            InstanceEvent::DeclassifiedEntity { .. } => InstanceEventKind::DeclassifiedEntity,
            InstanceEvent::ReclassifiedEntity { .. } => InstanceEventKind::ReclassifiedEntity,
            InstanceEvent::DeletedEntity { .. } => InstanceEventKind::DeletedEntity,
            InstanceEvent::PurgedEntity { .. } => InstanceEventKind::PurgedEntity,
            InstanceEvent::DeletePurgedEntity { .. } => InstanceEventKind::DeletePurgedEntity,
            InstanceEvent::RestoredEntity { .. } => InstanceEventKind::RestoredEntity,
            InstanceEvent::ReidentifiedEntity { .. } => InstanceEventKind::ReidentifiedEntity,
            InstanceEvent::RetypedEntity { .. } => InstanceEventKind::RetypedEntity,
            InstanceEvent::RehomedEntity { .. } => InstanceEventKind::RehomedEntity,
            InstanceEvent::RefreshEntityRequest { .. } => InstanceEventKind::RefreshEntityRequest,
            InstanceEvent::RefreshedEntity { .. } => InstanceEventKind::RefreshedEntity,
            InstanceEvent::NewRelationship { .. } => InstanceEventKind::NewRelationship,
            InstanceEvent::UpdatedRelationship { .. } => InstanceEventKind::UpdatedRelationship,
            InstanceEvent::UndoneRelationship { .. } => InstanceEventKind::UndoneRelationship,
            InstanceEvent::DeletedRelationship { .. } => InstanceEventKind::DeletedRelationship,
            InstanceEvent::PurgedRelationship { .. } => InstanceEventKind::PurgedRelationship,
            InstanceEvent::DeletePurgedRelationship { .. } => {
                InstanceEventKind::DeletePurgedRelationship
            }
            InstanceEvent::RestoredRelationship { .. } => InstanceEventKind::RestoredRelationship,
            InstanceEvent::ReidentifiedRelationship { .. } => {
                InstanceEventKind::ReidentifiedRelationship
            }
            InstanceEvent::RetypedRelationship { .. } => InstanceEventKind::RetypedRelationship,
            InstanceEvent::RehomedRelationship { .. } => InstanceEventKind::RehomedRelationship,
            InstanceEvent::RefreshRelationshipRequest { .. } => {
                InstanceEventKind::RefreshRelationshipRequest
            }
            InstanceEvent::RefreshedRelationship { .. } => {
                InstanceEventKind::RefreshedRelationship
            }
            InstanceEvent::InstanceBatch { .. } => InstanceEventKind::InstanceBatch,
            InstanceEvent::InstanceError { .. } => InstanceEventKind::InstanceError,
            InstanceEvent::Unknown => InstanceEventKind::Unknown,
        }
    }

    pub fn family(&self) -> EventFamily {
        self.kind().family()
    }

    /// The header the event is about, for kinds that carry a full instance.
    pub fn header(&self) -> Option<&InstanceHeader> {
        match self {
            InstanceEvent::NewEntity { entity }
            | InstanceEvent::UpdatedEntity { entity, .. }
            | InstanceEvent::UndoneEntity { entity }
            | InstanceEvent::ClassifiedEntity { entity, .. }
            | InstanceEvent::DeclassifiedEntity { entity, .. }
            | InstanceEvent::ReclassifiedEntity { entity, .. }
            | InstanceEvent::DeletedEntity { entity }
            | InstanceEvent::DeletePurgedEntity { entity }
            | InstanceEvent::RestoredEntity { entity }
            | InstanceEvent::ReidentifiedEntity { entity, .. }
            | InstanceEvent::RetypedEntity { entity, .. }
            | InstanceEvent::RehomedEntity { entity, .. }
            | InstanceEvent::RefreshedEntity { entity } => Some(&entity.header),
            InstanceEvent::NewRelationship { relationship }
            | InstanceEvent::UpdatedRelationship { relationship, .. }
            | InstanceEvent::UndoneRelationship { relationship }
            | InstanceEvent::DeletedRelationship { relationship }
            | InstanceEvent::DeletePurgedRelationship { relationship }
            | InstanceEvent::RestoredRelationship { relationship }
            | InstanceEvent::ReidentifiedRelationship { relationship, .. }
            | InstanceEvent::RetypedRelationship { relationship, .. }
            | InstanceEvent::RehomedRelationship { relationship, .. }
            | InstanceEvent::RefreshedRelationship { relationship } => Some(&relationship.header),
            _ => None,
        }
    }

    /// GUID of the instance the event is about, if it names exactly one.
    pub fn subject_guid(&self) -> Option<&str> {
        match self {
            InstanceEvent::PurgedEntity { instance_guid, .. }
            | InstanceEvent::PurgedRelationship { instance_guid, .. }
            | InstanceEvent::RefreshEntityRequest { instance_guid, .. }
            | InstanceEvent::RefreshRelationshipRequest { instance_guid, .. } => {
                Some(instance_guid)
            }
            _ => self.header().map(|h| h.guid.as_str()),
        }
    }
}

impl InstanceEvent {
    /// The `event_type` tag this event carries on the wire.
    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

// ---------------------------------------------------------------------------
// Wire envelope
// ---------------------------------------------------------------------------

/// What the transport hands over. Either half may be missing when a foreign
/// or truncated message arrives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InstanceEventMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originator: Option<EventOriginator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<InstanceEvent>,
}

impl InstanceEventMessage {
    pub fn new(originator: EventOriginator, event: InstanceEvent) -> Self {
        Self {
            originator: Some(originator),
            event: Some(event),
        }
    }

    /// Decode the envelope first, then each half, so a broken event body
    /// from a known originator can be told apart from foreign input.
    pub fn decode(raw: &str) -> Result<Self, MessageDecodeError> {
        let envelope: RawEnvelope =
            serde_json::from_str(raw).map_err(MessageDecodeError::Envelope)?;
        let originator = envelope
            .originator
            .map(serde_json::from_value::<EventOriginator>)
            .transpose()
            .map_err(MessageDecodeError::Envelope)?;

        let Some(body) = envelope.event else {
            return Ok(Self {
                originator,
                event: None,
            });
        };
        let event_type = body
            .get("event_type")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        match serde_json::from_value::<InstanceEvent>(body) {
            Ok(event) => Ok(Self {
                originator,
                event: Some(event),
            }),
            Err(error) => match (originator, event_type) {
                (Some(originator), Some(event_type)) => Err(MessageDecodeError::Event {
                    originator,
                    event_type,
                    error,
                }),
                _ => Err(MessageDecodeError::Envelope(error)),
            },
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    originator: Option<serde_json::Value>,
    #[serde(default)]
    event: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageDecodeError {
    /// Not a readable message, or one with no originator or event kind.
    #[error("undecodable message: {0}")]
    Envelope(#[source] serde_json::Error),

    /// A known originator sent a recognisable event kind with a broken body.
    #[error("malformed {event_type} payload: {error}")]
    Event {
        originator: EventOriginator,
        event_type: String,
        #[source]
        error: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstanceType;
    use serde_json::json;

    #[test]
    fn kind_strings_match_serde_tags() {
        let event = InstanceEvent::PurgedEntity {
            type_def_guid: "t1".into(),
            type_def_name: "Asset".into(),
            instance_guid: "g1".into(),
        };
        let payload = event.to_payload().unwrap();
        assert_eq!(payload["event_type"], event.event_type());
    }

    #[test]
    fn unknown_event_type_deserializes_to_unknown() {
        let event: InstanceEvent =
            serde_json::from_value(json!({ "event_type": "teleported_entity" })).unwrap();
        assert_eq!(event, InstanceEvent::Unknown);
        assert_eq!(event.family(), EventFamily::Ignored);
    }

    #[test]
    fn unknown_error_code_deserializes_to_unknown() {
        let event: InstanceEvent = serde_json::from_value(json!({
            "event_type": "instance_error",
            "error": { "error_code": "disk_on_fire" }
        }))
        .unwrap();
        match event {
            InstanceEvent::InstanceError { error } => assert_eq!(error, InstanceEventError::Unknown),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn message_without_event_parses() {
        let msg = InstanceEventMessage::decode(
            r#"{"originator": {"metadata_collection_id": "c1", "server_name": "s1"}}"#,
        )
        .unwrap();
        assert!(msg.event.is_none());
        assert_eq!(msg.originator.unwrap().collection_id(), "c1");
    }

    #[test]
    fn broken_body_from_known_originator_keeps_its_identity() {
        let raw = json!({
            "originator": { "metadata_collection_id": "c1", "server_name": "s1" },
            "event": { "event_type": "new_entity", "entity": { "instance_type": 7 } }
        })
        .to_string();
        match InstanceEventMessage::decode(&raw) {
            Err(MessageDecodeError::Event {
                originator,
                event_type,
                ..
            }) => {
                assert_eq!(originator.collection_id(), "c1");
                assert_eq!(event_type, "new_entity");
            }
            other => panic!("expected event decode error, got {other:?}"),
        }
    }

    #[test]
    fn broken_body_without_kind_is_foreign() {
        let raw = json!({
            "originator": { "metadata_collection_id": "c1" },
            "event": { "entity": {} }
        })
        .to_string();
        assert!(matches!(
            InstanceEventMessage::decode(&raw),
            Err(MessageDecodeError::Envelope(_))
        ));
        assert!(matches!(
            InstanceEventMessage::decode("not json"),
            Err(MessageDecodeError::Envelope(_))
        ));
    }

    #[test]
    fn decode_accepts_missing_halves() {
        let msg = InstanceEventMessage::decode(r#"{"event": {"event_type": "teleported_entity"}}"#)
            .unwrap();
        assert!(msg.originator.is_none());
        assert_eq!(msg.event, Some(InstanceEvent::Unknown));
    }

    #[test]
    fn subject_guid_covers_identity_only_kinds() {
        let entity = EntityDetail::new(InstanceHeader::new(
            "g2",
            InstanceType::new("t1", "Asset"),
            "home",
        ));
        assert_eq!(
            InstanceEvent::NewEntity { entity }.subject_guid(),
            Some("g2")
        );
        let refresh = InstanceEvent::RefreshRelationshipRequest {
            type_def_guid: "t".into(),
            type_def_name: "Link".into(),
            instance_guid: "r9".into(),
            home_metadata_collection_id: "home".into(),
        };
        assert_eq!(refresh.subject_guid(), Some("r9"));
        assert!(refresh.header().is_none());
    }
}
