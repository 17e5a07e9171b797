//! Structural and provenance checks on inbound reference instance headers.

use cohort_instances::{InstanceHeader, InstanceProvenance};

use crate::error::ValidationError;

/// Validates a header before any storage action is taken for it.
pub trait InstanceValidator: Send + Sync {
    fn validate_reference_instance_header(
        &self,
        repository_name: &str,
        local_collection_id: &str,
        param_name: &str,
        header: &InstanceHeader,
        method_name: &str,
    ) -> Result<(), ValidationError>;
}

/// Default header rules for reference copies.
///
/// A header must name its instance, its type and its home collection, must
/// have a known provenance and a positive version, and must not be homed in
/// the local collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderValidator;

impl InstanceValidator for HeaderValidator {
    fn validate_reference_instance_header(
        &self,
        repository_name: &str,
        local_collection_id: &str,
        param_name: &str,
        header: &InstanceHeader,
        method_name: &str,
    ) -> Result<(), ValidationError> {
        let method = method_name.to_string();
        let param = param_name.to_string();

        if header.guid.trim().is_empty() {
            return Err(ValidationError::MissingGuid { method, param });
        }
        let guid = header.guid.clone();

        let Some(instance_type) = header.instance_type.as_ref() else {
            return Err(ValidationError::MissingType {
                method,
                param,
                guid,
            });
        };
        if instance_type.type_def_guid.trim().is_empty() {
            return Err(ValidationError::IncompleteType {
                method,
                param,
                guid,
                detail: "no type def GUID",
            });
        }
        if instance_type.type_def_name.trim().is_empty() {
            return Err(ValidationError::IncompleteType {
                method,
                param,
                guid,
                detail: "no type def name",
            });
        }

        let home = match header.metadata_collection_id.as_deref() {
            Some(home) if !home.trim().is_empty() => home,
            _ => {
                return Err(ValidationError::MissingHome {
                    method,
                    param,
                    guid,
                })
            }
        };
        if home == local_collection_id {
            return Err(ValidationError::LocallyHomed {
                method,
                repository: repository_name.to_string(),
                guid,
                collection_id: local_collection_id.to_string(),
            });
        }

        if header.instance_provenance == InstanceProvenance::Unknown {
            return Err(ValidationError::UnknownProvenance {
                method,
                param,
                guid,
            });
        }

        if header.version == 0 {
            return Err(ValidationError::InvalidVersion {
                method,
                param,
                guid,
                version: header.version,
            });
        }

        Ok(())
    }
}
