//! Local type-definition activity.
//!
//! Replication only needs one question answered about type definitions: is
//! this type known and enabled here right now?

use std::collections::HashSet;
use std::sync::RwLock;

/// Answers whether a type definition is active in the local repository.
pub trait TypeActivity: Send + Sync {
    fn is_type_active(&self, type_def_guid: &str, type_def_name: &str) -> bool;
}

/// In-process set of active type definitions, matched by GUID or name.
///
/// Types can be switched on and off at runtime as the local type store
/// changes.
pub struct ActiveTypeRegistry {
    all_active: bool,
    active: RwLock<HashSet<String>>,
}

impl ActiveTypeRegistry {
    /// Only the listed types (GUIDs or names) are active.
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            all_active: false,
            active: RwLock::new(types.into_iter().map(Into::into).collect()),
        }
    }

    /// Every type is active.
    pub fn permissive() -> Self {
        Self {
            all_active: true,
            active: RwLock::new(HashSet::new()),
        }
    }

    pub fn activate(&self, type_ref: impl Into<String>) {
        self.active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(type_ref.into());
    }

    pub fn deactivate(&self, type_ref: &str) {
        self.active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(type_ref);
    }
}

impl TypeActivity for ActiveTypeRegistry {
    fn is_type_active(&self, type_def_guid: &str, type_def_name: &str) -> bool {
        if self.all_active {
            return true;
        }
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        active.contains(type_def_guid) || active.contains(type_def_name)
    }
}
