//! Dispatch routing, filtering and lifecycle against the in-memory store.

mod harness;

use std::sync::Arc;

use cohort_core::{ActiveTypeRegistry, ExchangeRule, ExchangeRuleKind, RuleSettings};
use cohort_engine::{DispatchOutcome, ReferenceState, StoreCall};
use cohort_instances::{
    Classification, ConflictSide, EventFamily, EventOriginator, InstanceEvent,
    InstanceEventError, InstanceEventKind, InstanceEventMessage, InstanceGraph,
    InstanceProvenance, InstanceStatus, TypeDefSummary,
};

use harness::*;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn type_summary(guid: &str, name: &str, version: u64) -> TypeDefSummary {
    TypeDefSummary {
        guid: guid.into(),
        name: name.into(),
        version,
        version_name: None,
    }
}

fn conflict_side(collection: &str) -> ConflictSide {
    ConflictSide {
        metadata_collection_id: collection.into(),
        provenance: InstanceProvenance::LocalCohort,
        type_def_summary: type_summary(ASSET_GUID, ASSET, 1),
        instance_guid: "g-dup".into(),
    }
}

fn classification() -> Classification {
    Classification {
        name: "Confidentiality".into(),
        properties: Default::default(),
        metadata_collection_id: Some(REMOTE.into()),
        version: 1,
    }
}

/// One representative event per kind.
fn sample_event(kind: InstanceEventKind) -> InstanceEvent {
    let e = entity("g-e", 2);
    let r = relationship("g-r", 2);
    match kind {
        InstanceEventKind::NewEntity => InstanceEvent::NewEntity { entity: e },
        InstanceEventKind::UpdatedEntity => InstanceEvent::UpdatedEntity {
            original_entity: Some(entity("g-e", 1)),
            entity: e,
        },
        InstanceEventKind::UndoneEntity => InstanceEvent::UndoneEntity { entity: e },
        InstanceEventKind::ClassifiedEntity => InstanceEvent::ClassifiedEntity {
            entity: e,
            classification: Some(classification()),
        },
        InstanceEventKind::DeclassifiedEntity => InstanceEvent::DeclassifiedEntity {
            entity: e,
            original_classification: Some(classification()),
        },
        InstanceEventKind::ReclassifiedEntity => InstanceEvent::ReclassifiedEntity {
            entity: e,
            original_classification: Some(classification()),
            classification: Some(classification()),
        },
        InstanceEventKind::DeletedEntity => InstanceEvent::DeletedEntity { entity: e },
        InstanceEventKind::PurgedEntity => InstanceEvent::PurgedEntity {
            type_def_guid: ASSET_GUID.into(),
            type_def_name: ASSET.into(),
            instance_guid: "g-e".into(),
        },
        InstanceEventKind::DeletePurgedEntity => InstanceEvent::DeletePurgedEntity { entity: e },
        InstanceEventKind::RestoredEntity => InstanceEvent::RestoredEntity { entity: e },
        InstanceEventKind::ReidentifiedEntity => InstanceEvent::ReidentifiedEntity {
            original_entity_guid: "g-old".into(),
            entity: e,
        },
        InstanceEventKind::RetypedEntity => InstanceEvent::RetypedEntity {
            original_type_def_summary: type_summary("t-old", "OldAsset", 1),
            entity: e,
        },
        InstanceEventKind::RehomedEntity => InstanceEvent::RehomedEntity {
            original_home_metadata_collection_id: "c-old".into(),
            entity: e,
        },
        InstanceEventKind::RefreshEntityRequest => InstanceEvent::RefreshEntityRequest {
            type_def_guid: ASSET_GUID.into(),
            type_def_name: ASSET.into(),
            instance_guid: "g-e".into(),
            home_metadata_collection_id: LOCAL.into(),
        },
        InstanceEventKind::RefreshedEntity => InstanceEvent::RefreshedEntity { entity: e },
        InstanceEventKind::NewRelationship => InstanceEvent::NewRelationship { relationship: r },
        InstanceEventKind::UpdatedRelationship => InstanceEvent::UpdatedRelationship {
            original_relationship: None,
            relationship: r,
        },
        InstanceEventKind::UndoneRelationship => {
            InstanceEvent::UndoneRelationship { relationship: r }
        }
        InstanceEventKind::DeletedRelationship => {
            InstanceEvent::DeletedRelationship { relationship: r }
        }
        InstanceEventKind::PurgedRelationship => InstanceEvent::PurgedRelationship {
            type_def_guid: LINK_GUID.into(),
            type_def_name: LINK.into(),
            instance_guid: "g-r".into(),
        },
        InstanceEventKind::DeletePurgedRelationship => {
            InstanceEvent::DeletePurgedRelationship { relationship: r }
        }
        InstanceEventKind::RestoredRelationship => {
            InstanceEvent::RestoredRelationship { relationship: r }
        }
        InstanceEventKind::ReidentifiedRelationship => InstanceEvent::ReidentifiedRelationship {
            original_relationship_guid: "g-old".into(),
            relationship: r,
        },
        InstanceEventKind::RetypedRelationship => InstanceEvent::RetypedRelationship {
            original_type_def_summary: type_summary("t-old", "OldLink", 1),
            relationship: r,
        },
        InstanceEventKind::RehomedRelationship => InstanceEvent::RehomedRelationship {
            original_home_metadata_collection_id: "c-old".into(),
            relationship: r,
        },
        InstanceEventKind::RefreshRelationshipRequest => {
            InstanceEvent::RefreshRelationshipRequest {
                type_def_guid: LINK_GUID.into(),
                type_def_name: LINK.into(),
                instance_guid: "g-r".into(),
                home_metadata_collection_id: LOCAL.into(),
            }
        }
        InstanceEventKind::RefreshedRelationship => {
            InstanceEvent::RefreshedRelationship { relationship: r }
        }
        InstanceEventKind::InstanceBatch => InstanceEvent::InstanceBatch {
            instances: InstanceGraph {
                entities: vec![e],
                relationships: vec![r],
            },
        },
        InstanceEventKind::InstanceError => InstanceEvent::InstanceError {
            error: InstanceEventError::ConflictingType {
                target_metadata_collection_id: REMOTE.into(),
                target_instance_guid: "g-e".into(),
                target_type_def_summary: type_summary(ASSET_GUID, ASSET, 1),
                other_type_def_summary: type_summary(ASSET_GUID, ASSET, 2),
                error_message: "type version mismatch".into(),
            },
        },
        InstanceEventKind::Unknown => InstanceEvent::Unknown,
    }
}

fn family_of_call(call: &StoreCall) -> EventFamily {
    match call {
        StoreCall::SaveEntity { .. } | StoreCall::SaveRelationship { .. } => EventFamily::Upsert,
        StoreCall::PurgeEntity { .. } | StoreCall::PurgeRelationship { .. } => EventFamily::Purge,
        StoreCall::RefreshEntity { .. } | StoreCall::RefreshRelationship { .. } => {
            EventFamily::RefreshRequest
        }
        StoreCall::SaveBatch { .. } => EventFamily::Batch,
        other => panic!("dispatch should never query the store: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_entity_is_saved_exactly_once() {
    let h = Harness::new();
    let sent = entity("g1", 1);

    let outcome = h
        .dispatch(InstanceEvent::NewEntity {
            entity: sent.clone(),
        })
        .await;

    assert_eq!(outcome, DispatchOutcome::Applied);
    assert_eq!(
        h.store.calls(),
        vec![StoreCall::SaveEntity {
            source: SOURCE.into(),
            entity: sent,
        }]
    );
    assert!(h.audit.is_empty());
}

#[tokio::test]
async fn purged_relationship_bypasses_exchange_rule() {
    let rule = ExchangeRule::new(
        RuleSettings::new(ExchangeRuleKind::RegistrationOnly),
        RuleSettings::new(ExchangeRuleKind::RegistrationOnly),
        Arc::new(ActiveTypeRegistry::new(Vec::<String>::new())),
    );
    let h = Harness::with_rule(Arc::new(rule));

    let outcome = h
        .dispatch(InstanceEvent::PurgedRelationship {
            type_def_guid: "t1".into(),
            type_def_name: "Foo".into(),
            instance_guid: "g1".into(),
        })
        .await;

    assert_eq!(outcome, DispatchOutcome::Applied);
    assert_eq!(
        h.store.calls(),
        vec![StoreCall::PurgeRelationship {
            source: SOURCE.into(),
            guid: "g1".into(),
            type_def_guid: "t1".into(),
            type_def_name: "Foo".into(),
            home_collection_id: REMOTE.into(),
        }]
    );
}

#[tokio::test]
async fn conflicting_instances_are_recorded_once_without_store_mutation() {
    let h = Harness::new();

    let outcome = h
        .dispatch(InstanceEvent::InstanceError {
            error: InstanceEventError::ConflictingInstances {
                target: conflict_side(REMOTE),
                other: conflict_side("c-other"),
                error_message: "duplicate GUID".into(),
            },
        })
        .await;

    assert_eq!(outcome, DispatchOutcome::ConflictRecorded);
    assert_eq!(h.conflicts.len(), 1);
    assert!(h.store.mutation_calls().is_empty());

    let report = &h.conflicts.reports()[0];
    assert_eq!(report.conflict.kind(), "conflicting_instances");
    assert_eq!(report.originator, originator());
}

#[tokio::test]
async fn message_without_kind_or_originator_is_silently_ignored() {
    let h = Harness::new();

    let no_event = InstanceEventMessage {
        originator: Some(originator()),
        event: None,
    };
    let no_originator = InstanceEventMessage {
        originator: None,
        event: Some(InstanceEvent::NewEntity {
            entity: entity("g1", 1),
        }),
    };

    assert_eq!(
        h.dispatcher.dispatch(SOURCE, no_event).await,
        DispatchOutcome::Ignored
    );
    assert_eq!(
        h.dispatcher.dispatch(SOURCE, no_originator).await,
        DispatchOutcome::Ignored
    );
    assert!(h.store.calls().is_empty());
    assert!(h.audit.is_empty());
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inactive_type_is_filtered_without_store_call() {
    let types = Arc::new(ActiveTypeRegistry::new(["SomethingElse"]));
    let h = Harness::with_rule(Arc::new(ExchangeRule::save_all(types)));

    let outcomes = vec![
        h.dispatch(InstanceEvent::NewEntity {
            entity: entity("g1", 1),
        })
        .await,
        h.dispatch(InstanceEvent::RefreshedRelationship {
            relationship: relationship("g2", 1),
        })
        .await,
    ];

    assert_eq!(outcomes, vec![DispatchOutcome::Filtered; 2]);
    assert!(h.store.calls().is_empty());
    assert!(h.audit.is_empty());
}

#[tokio::test]
async fn selected_types_save_matching_header_unmodified() {
    let rule = ExchangeRule::new(
        RuleSettings::new(ExchangeRuleKind::SelectedTypes).with_selected_types([ASSET]),
        RuleSettings::default(),
        Arc::new(ActiveTypeRegistry::permissive()),
    );
    let h = Harness::with_rule(Arc::new(rule));
    let sent = entity("g1", 4);

    assert_eq!(
        h.dispatch(InstanceEvent::UpdatedEntity {
            original_entity: None,
            entity: sent.clone(),
        })
        .await,
        DispatchOutcome::Applied
    );
    assert_eq!(
        h.dispatch(InstanceEvent::NewRelationship {
            relationship: relationship("g2", 1),
        })
        .await,
        DispatchOutcome::Filtered
    );

    match h.store.calls().as_slice() {
        [StoreCall::SaveEntity { entity, .. }] => assert_eq!(entity, &sent),
        calls => panic!("expected one entity save, got {calls:?}"),
    }
}

#[tokio::test]
async fn locally_homed_instance_is_rejected_and_audited() {
    let h = Harness::new();
    let mut mine = entity("g1", 1);
    mine.header.metadata_collection_id = Some(LOCAL.into());

    let outcome = h.dispatch(InstanceEvent::NewEntity { entity: mine }).await;

    assert_eq!(outcome, DispatchOutcome::Failed);
    assert!(h.store.calls().is_empty());
    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, "process_new_entity_event");
    assert_eq!(records[0].originator_collection_id, REMOTE);
    assert!(records[0].error.contains(LOCAL));
}

// ---------------------------------------------------------------------------
// Tag completeness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_kind_reaches_exactly_its_family() {
    for kind in InstanceEventKind::ALL {
        let h = Harness::new();
        let event = sample_event(kind);
        assert_eq!(event.kind(), kind);

        let outcome = h.dispatch(event).await;
        let calls = h.store.calls();

        match kind.family() {
            EventFamily::Error => {
                assert_eq!(outcome, DispatchOutcome::ConflictRecorded, "{kind}");
                assert!(calls.is_empty(), "{kind}");
                assert_eq!(h.conflicts.len(), 1, "{kind}");
            }
            EventFamily::Ignored => {
                assert_eq!(outcome, DispatchOutcome::Ignored, "{kind}");
                assert!(calls.is_empty(), "{kind}");
            }
            family => {
                assert_eq!(outcome, DispatchOutcome::Applied, "{kind}");
                assert_eq!(calls.len(), 1, "{kind}");
                assert_eq!(family_of_call(&calls[0]), family, "{kind}");
                assert!(h.conflicts.is_empty(), "{kind}");
            }
        }
        assert!(h.audit.is_empty(), "{kind}");
    }
}

#[tokio::test]
async fn unrecognized_kinds_and_error_codes_are_ignored() {
    let h = Harness::new();

    let outcomes = vec![
        h.dispatcher
            .dispatch_json(
                SOURCE,
                r#"{"originator": {"metadata_collection_id": "c-remote"},
                    "event": {"event_type": "teleported_entity"}}"#,
            )
            .await,
        h.dispatch(InstanceEvent::InstanceError {
            error: InstanceEventError::NotInUse,
        })
        .await,
        h.dispatch(InstanceEvent::InstanceError {
            error: InstanceEventError::Unknown,
        })
        .await,
        h.dispatcher.dispatch_json(SOURCE, "not json at all").await,
    ];

    assert_eq!(outcomes, vec![DispatchOutcome::Ignored; 4]);
    assert!(h.store.calls().is_empty());
    assert!(h.conflicts.is_empty());
    assert!(h.audit.is_empty());
}

#[tokio::test]
async fn json_messages_dispatch_like_typed_ones() {
    let h = Harness::new();
    let raw = serde_json::json!({
        "originator": { "metadata_collection_id": REMOTE, "server_name": "server-remote" },
        "event": {
            "event_type": "new_entity",
            "entity": {
                "guid": "g1",
                "instance_type": { "type_def_guid": ASSET_GUID, "type_def_name": ASSET },
                "metadata_collection_id": REMOTE,
                "instance_provenance": "local_cohort",
                "version": 3
            }
        }
    })
    .to_string();

    assert_eq!(
        h.dispatcher.dispatch_json(SOURCE, &raw).await,
        DispatchOutcome::Applied
    );
    let stored = h.store.entity("g1").expect("entity saved");
    assert_eq!(stored.header.version, 3);
    assert_eq!(stored.header.replicated_by.as_deref(), Some(REMOTE));
}

#[tokio::test]
async fn broken_json_body_from_known_originator_is_audited() {
    let h = Harness::new();
    let raw = serde_json::json!({
        "originator": { "metadata_collection_id": REMOTE, "server_name": "server-remote" },
        "event": { "event_type": "new_entity", "entity": { "instance_type": 7 } }
    })
    .to_string();

    let outcome = h.dispatcher.dispatch_json(SOURCE, &raw).await;

    assert_eq!(outcome, DispatchOutcome::Failed);
    assert!(h.store.calls().is_empty());
    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, "dispatch_json");
    assert_eq!(records[0].originator_collection_id, REMOTE);
    assert!(records[0].error.contains("new_entity"));
}

#[tokio::test]
async fn foreign_json_is_dropped_without_audit() {
    let h = Harness::new();
    let no_kind = serde_json::json!({
        "originator": { "metadata_collection_id": REMOTE },
        "event": { "entity": {} }
    })
    .to_string();
    let no_originator = serde_json::json!({
        "event": { "event_type": "new_entity", "entity": 7 }
    })
    .to_string();

    for raw in [no_kind.as_str(), no_originator.as_str(), "not json at all"] {
        assert_eq!(
            h.dispatcher.dispatch_json(SOURCE, raw).await,
            DispatchOutcome::Ignored
        );
    }
    assert!(h.audit.is_empty());
    assert!(h.store.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Purge, refresh and batches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_purge_leaves_same_state_as_one() {
    let purge = || InstanceEvent::PurgedEntity {
        type_def_guid: ASSET_GUID.into(),
        type_def_name: ASSET.into(),
        instance_guid: "g-never".into(),
    };

    let once = Harness::new();
    once.dispatch(purge()).await;

    let many = Harness::new();
    for _ in 0..5 {
        assert_eq!(many.dispatch(purge()).await, DispatchOutcome::Applied);
    }

    assert_eq!(once.store.state_of("g-never"), ReferenceState::Purged);
    assert_eq!(many.store.state_of("g-never"), ReferenceState::Purged);
    assert_eq!(once.store.entity_count(), many.store.entity_count());
    assert!(many.audit.is_empty());
}

#[tokio::test]
async fn purge_without_originator_collection_is_audited() {
    let h = Harness::new();
    let anonymous = EventOriginator {
        server_name: Some("server-anon".into()),
        ..EventOriginator::default()
    };

    let outcome = h
        .dispatcher
        .dispatch(
            SOURCE,
            InstanceEventMessage::new(
                anonymous,
                InstanceEvent::PurgedEntity {
                    type_def_guid: ASSET_GUID.into(),
                    type_def_name: ASSET.into(),
                    instance_guid: "g1".into(),
                },
            ),
        )
        .await;

    assert_eq!(outcome, DispatchOutcome::Failed);
    assert!(h.store.calls().is_empty());
    assert_eq!(h.audit.records()[0].originator_server, "server-anon");
}

#[tokio::test]
async fn refresh_request_is_forwarded_with_requesting_collection() {
    let h = Harness::new();

    h.dispatch(InstanceEvent::RefreshRelationshipRequest {
        type_def_guid: LINK_GUID.into(),
        type_def_name: LINK.into(),
        instance_guid: "g-r".into(),
        home_metadata_collection_id: LOCAL.into(),
    })
    .await;

    assert_eq!(
        h.store.calls(),
        vec![StoreCall::RefreshRelationship {
            source: SOURCE.into(),
            guid: "g-r".into(),
            type_def_guid: LINK_GUID.into(),
            type_def_name: LINK.into(),
            home_collection_id: LOCAL.into(),
            requested_by: REMOTE.into(),
        }]
    );
}

#[tokio::test]
async fn refresh_request_without_requester_is_audited() {
    let h = Harness::new();
    let anonymous = EventOriginator {
        server_name: Some("server-anon".into()),
        ..EventOriginator::default()
    };

    let outcome = h
        .dispatcher
        .dispatch(
            SOURCE,
            InstanceEventMessage::new(
                anonymous,
                InstanceEvent::RefreshEntityRequest {
                    type_def_guid: ASSET_GUID.into(),
                    type_def_name: ASSET.into(),
                    instance_guid: "g1".into(),
                    home_metadata_collection_id: LOCAL.into(),
                },
            ),
        )
        .await;

    assert_eq!(outcome, DispatchOutcome::Failed);
    assert!(h.store.calls().is_empty());
    assert_eq!(h.audit.len(), 1);
}

#[tokio::test]
async fn batch_is_handed_to_store_whole() {
    let h = Harness::new();

    let empty = h
        .dispatch(InstanceEvent::InstanceBatch {
            instances: InstanceGraph::default(),
        })
        .await;
    assert_eq!(empty, DispatchOutcome::Ignored);
    assert!(h.store.calls().is_empty());

    let graph = InstanceGraph {
        entities: vec![entity("e1", 1), entity("e2", 1)],
        relationships: vec![relationship("r1", 1)],
    };
    let outcome = h
        .dispatch(InstanceEvent::InstanceBatch {
            instances: graph.clone(),
        })
        .await;

    assert_eq!(outcome, DispatchOutcome::Applied);
    assert_eq!(
        h.store.calls(),
        vec![StoreCall::SaveBatch {
            source: SOURCE.into(),
            graph,
        }]
    );
    assert_eq!(h.store.entity_count(), 2);
    assert_eq!(h.store.relationship_count(), 1);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reference_copy_walks_the_lifecycle() {
    let h = Harness::new();
    let deleted = {
        let mut e = entity("g1", 2);
        e.header.status = InstanceStatus::Deleted;
        e
    };

    h.dispatch(InstanceEvent::NewEntity {
        entity: entity("g1", 1),
    })
    .await;
    assert_eq!(h.store.state_of("g1"), ReferenceState::Known);

    h.dispatch(InstanceEvent::DeletedEntity { entity: deleted })
        .await;
    assert_eq!(h.store.state_of("g1"), ReferenceState::Deleted);

    h.dispatch(InstanceEvent::RestoredEntity {
        entity: entity("g1", 3),
    })
    .await;
    assert_eq!(h.store.state_of("g1"), ReferenceState::Known);

    // Late delivery of an older version does not roll the copy back.
    h.dispatch(InstanceEvent::UpdatedEntity {
        original_entity: None,
        entity: entity("g1", 2),
    })
    .await;
    assert_eq!(h.store.entity("g1").map(|e| e.header.version), Some(3));

    h.dispatch(InstanceEvent::DeletePurgedEntity {
        entity: entity("g1", 4),
    })
    .await;
    assert_eq!(h.store.state_of("g1"), ReferenceState::Purged);

    // Purge is terminal.
    h.dispatch(InstanceEvent::NewEntity {
        entity: entity("g1", 5),
    })
    .await;
    assert_eq!(h.store.state_of("g1"), ReferenceState::Purged);
    assert!(h.store.entity("g1").is_none());
    assert!(h.audit.is_empty());
}
