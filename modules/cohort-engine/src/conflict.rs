//! Conflict records and reporters.
//!
//! Conflicts are recorded exactly once per event and never resolved here.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use cohort_instances::{ConflictSide, EventOriginator, TypeDefSummary};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::traits::ConflictReporter;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictReport {
    pub id: Uuid,
    pub detected_at: DateTime<Utc>,
    pub source: String,
    pub originator: EventOriginator,
    pub conflict: Conflict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Conflict {
    /// Two home repositories claim the same instance GUID.
    Instance {
        target: ConflictSide,
        other: ConflictSide,
        message: String,
    },
    /// An instance's type version disagrees with the locally stored type.
    Type {
        target_metadata_collection_id: String,
        target_instance_guid: String,
        target_type: TypeDefSummary,
        other_type: TypeDefSummary,
        message: String,
    },
}

impl Conflict {
    pub fn kind(&self) -> &'static str {
        match self {
            Conflict::Instance { .. } => "conflicting_instances",
            Conflict::Type { .. } => "conflicting_type",
        }
    }
}

impl ConflictReport {
    pub fn new(source: impl Into<String>, originator: &EventOriginator, conflict: Conflict) -> Self {
        Self {
            id: Uuid::new_v4(),
            detected_at: Utc::now(),
            source: source.into(),
            originator: originator.clone(),
            conflict,
        }
    }
}

/// Logs each conflict at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingConflictReporter;

impl ConflictReporter for LoggingConflictReporter {
    fn report(&self, report: ConflictReport) {
        match &report.conflict {
            Conflict::Instance {
                target,
                other,
                message,
            } => warn!(
                conflict_id = %report.id,
                source = report.source.as_str(),
                originator = report.originator.server(),
                guid = target.instance_guid.as_str(),
                target_collection = target.metadata_collection_id.as_str(),
                other_collection = other.metadata_collection_id.as_str(),
                other_provenance = %other.provenance,
                detail = message.as_str(),
                "Conflicting instances reported"
            ),
            Conflict::Type {
                target_metadata_collection_id,
                target_instance_guid,
                target_type,
                other_type,
                message,
            } => warn!(
                conflict_id = %report.id,
                source = report.source.as_str(),
                originator = report.originator.server(),
                guid = target_instance_guid.as_str(),
                target_collection = target_metadata_collection_id.as_str(),
                target_type = %target_type,
                other_type = %other_type,
                detail = message.as_str(),
                "Conflicting type reported"
            ),
        }
    }
}

/// Keeps conflict reports in memory for assertions or an admin view.
#[derive(Default)]
pub struct MemoryConflictLog {
    reports: Mutex<Vec<ConflictReport>>,
}

impl MemoryConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ConflictReport> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConflictReporter for MemoryConflictLog {
    fn report(&self, report: ConflictReport) {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report);
    }
}

impl<C: ConflictReporter + ?Sized> ConflictReporter for Arc<C> {
    fn report(&self, report: ConflictReport) {
        (**self).report(report)
    }
}
