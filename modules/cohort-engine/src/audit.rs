//! AuditSink implementations.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use cohort_instances::EventOriginator;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::traits::AuditSink;

/// One per-event failure: which entry point, where the event came from, and
/// what went wrong.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub method: String,
    pub source: String,
    pub originator_server: String,
    pub originator_collection_id: String,
    pub error: String,
}

impl AuditRecord {
    pub fn new(
        method: impl Into<String>,
        source: impl Into<String>,
        originator: &EventOriginator,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            method: method.into(),
            source: source.into(),
            originator_server: originator.server().to_string(),
            originator_collection_id: originator.collection_id().to_string(),
            error: error.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TracingAuditSink (production default)
// ---------------------------------------------------------------------------

/// Writes each record as a structured `error!` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        error!(
            audit_id = %record.id,
            method = record.method.as_str(),
            source = record.source.as_str(),
            originator_server = record.originator_server.as_str(),
            originator_collection_id = record.originator_collection_id.as_str(),
            error = record.error.as_str(),
            "Instance event processing failed"
        );
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditSink (tests)
// ---------------------------------------------------------------------------

/// Keeps records in memory for assertions. Thread-safe.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

impl<A: AuditSink + ?Sized> AuditSink for Arc<A> {
    fn record(&self, record: AuditRecord) {
        (**self).record(record)
    }
}
