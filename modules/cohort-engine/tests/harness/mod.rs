//! Shared fixtures for engine integration tests.
//!
//! Builds a dispatcher over in-memory collaborators so each test can assert on
//! the exact store calls, audit records and conflict reports it produced.

#![allow(dead_code)]

use std::sync::Arc;

use cohort_core::{ActiveTypeRegistry, ExchangeRule, ExchangeRuleEngine, HeaderValidator};
use cohort_engine::{
    MemoryAuditSink, MemoryConflictLog, MemoryReferenceStore, ReferenceCopyDispatcher,
    ReferenceCopyStore,
};
use cohort_instances::{
    EntityDetail, EntityProxy, EventOriginator, InstanceEvent, InstanceEventMessage,
    InstanceHeader, InstanceType, Relationship,
};

pub const LOCAL: &str = "c-local";
pub const REMOTE: &str = "c-remote";
pub const SOURCE: &str = "cohort-a";

pub const ASSET_GUID: &str = "t-asset";
pub const ASSET: &str = "Asset";
pub const LINK_GUID: &str = "t-link";
pub const LINK: &str = "AssetLink";

pub fn originator() -> EventOriginator {
    EventOriginator::new(REMOTE, "server-remote")
}

pub fn entity(guid: &str, version: u64) -> EntityDetail {
    EntityDetail::new(
        InstanceHeader::new(guid, InstanceType::new(ASSET_GUID, ASSET), REMOTE)
            .with_version(version),
    )
}

pub fn relationship(guid: &str, version: u64) -> Relationship {
    Relationship::new(
        InstanceHeader::new(guid, InstanceType::new(LINK_GUID, LINK), REMOTE)
            .with_version(version),
        EntityProxy::new(entity("e-one", 1).header),
        EntityProxy::new(entity("e-two", 1).header),
    )
}

pub fn message(event: InstanceEvent) -> InstanceEventMessage {
    InstanceEventMessage::new(originator(), event)
}

/// Saves every instance of an active type.
pub fn permissive_rule() -> Arc<dyn ExchangeRuleEngine> {
    Arc::new(ExchangeRule::save_all(Arc::new(
        ActiveTypeRegistry::permissive(),
    )))
}

pub struct Harness {
    pub dispatcher: ReferenceCopyDispatcher,
    pub store: Arc<MemoryReferenceStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub conflicts: Arc<MemoryConflictLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_rule(permissive_rule())
    }

    pub fn with_rule(rule: Arc<dyn ExchangeRuleEngine>) -> Self {
        Self::build(rule, |store| store as Arc<dyn ReferenceCopyStore>)
    }

    /// Put `wrap` between the dispatcher and the memory store, e.g. to inject
    /// faults. Assertions still read the inner memory store.
    pub fn with_store_wrapper<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<MemoryReferenceStore>) -> Arc<dyn ReferenceCopyStore>,
    {
        Self::build(permissive_rule(), wrap)
    }

    fn build<F>(rule: Arc<dyn ExchangeRuleEngine>, wrap: F) -> Self
    where
        F: FnOnce(Arc<MemoryReferenceStore>) -> Arc<dyn ReferenceCopyStore>,
    {
        let store = Arc::new(MemoryReferenceStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let conflicts = Arc::new(MemoryConflictLog::new());

        let dispatcher = ReferenceCopyDispatcher::builder()
            .local_collection_id(LOCAL)
            .local_server_name("server-local")
            .repository_name("repo-local")
            .store(wrap(store.clone()))
            .validator(Arc::new(HeaderValidator))
            .exchange_rule(rule)
            .audit_sink(audit.clone())
            .conflict_reporter(conflicts.clone())
            .build()
            .expect("harness wiring is complete");

        Self {
            dispatcher,
            store,
            audit,
            conflicts,
        }
    }

    pub async fn dispatch(&self, event: InstanceEvent) -> cohort_engine::DispatchOutcome {
        self.dispatcher.dispatch(SOURCE, message(event)).await
    }
}
