//! Reference copy replication engine.
//!
//! Turns instance events received from other cohort members into reference
//! copy actions: classify → validate → filter → store. Per-event failures go to
//! an `AuditSink` and never reach the transport.
//!
//! Storage, policy and validation are injected through the traits in
//! [`traits`] and `cohort-core`; in-memory versions live alongside for tests
//! and replay tooling.

pub mod audit;
pub mod conflict;
pub mod dispatcher;
pub mod memory_store;
pub mod retrieval;
pub mod traits;

pub use audit::{AuditRecord, MemoryAuditSink, TracingAuditSink};
pub use conflict::{Conflict, ConflictReport, LoggingConflictReporter, MemoryConflictLog};
pub use dispatcher::{DispatchOutcome, DispatcherBuilder, LocalIdentity, ReferenceCopyDispatcher};
pub use memory_store::{MemoryReferenceStore, ReferenceState, StoreCall};
pub use retrieval::RetrievalProcessor;
pub use traits::{AuditSink, ConflictReporter, InstanceEventProcessor, ReferenceCopyStore};
