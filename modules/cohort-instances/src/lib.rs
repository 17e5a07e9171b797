//! Instances and instance events exchanged between cohort members.
//!
//! Pure data: no I/O, no policy. The engine crate decides what to do with
//! these.

pub mod events;
pub mod types;

pub use events::{
    ConflictSide, EventFamily, InstanceEvent, InstanceEventError, InstanceEventKind,
    InstanceEventMessage, MessageDecodeError,
};
pub use types::*;
