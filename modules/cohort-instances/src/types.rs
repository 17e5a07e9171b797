use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Property values carried by an instance. Opaque to replication.
pub type InstanceProperties = BTreeMap<String, serde_json::Value>;

// --- Enums ---

/// How the local copy of an instance came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceProvenance {
    #[default]
    Unknown,
    LocalCohort,
    ReferenceCopy,
    ExportArchive,
    ContentPack,
    DeregisteredRepository,
    Configuration,
    ExternalSource,
}

impl std::fmt::Display for InstanceProvenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceProvenance::Unknown => write!(f, "unknown"),
            InstanceProvenance::LocalCohort => write!(f, "local_cohort"),
            InstanceProvenance::ReferenceCopy => write!(f, "reference_copy"),
            InstanceProvenance::ExportArchive => write!(f, "export_archive"),
            InstanceProvenance::ContentPack => write!(f, "content_pack"),
            InstanceProvenance::DeregisteredRepository => write!(f, "deregistered_repository"),
            InstanceProvenance::Configuration => write!(f, "configuration"),
            InstanceProvenance::ExternalSource => write!(f, "external_source"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Unknown,
    Draft,
    Proposed,
    #[default]
    Active,
    Deleted,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Unknown => write!(f, "unknown"),
            InstanceStatus::Draft => write!(f, "draft"),
            InstanceStatus::Proposed => write!(f, "proposed"),
            InstanceStatus::Active => write!(f, "active"),
            InstanceStatus::Deleted => write!(f, "deleted"),
        }
    }
}

// --- Type identity ---

/// The type an instance was created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InstanceType {
    pub type_def_guid: String,
    pub type_def_name: String,
    #[serde(default = "default_version")]
    pub type_def_version: u64,
}

impl InstanceType {
    pub fn new(type_def_guid: impl Into<String>, type_def_name: impl Into<String>) -> Self {
        Self {
            type_def_guid: type_def_guid.into(),
            type_def_name: type_def_name.into(),
            type_def_version: 1,
        }
    }

    pub fn summary(&self) -> TypeDefSummary {
        TypeDefSummary {
            guid: self.type_def_guid.clone(),
            name: self.type_def_name.clone(),
            version: self.type_def_version,
            version_name: None,
        }
    }
}

/// Identifies one version of a type definition. Used in conflict payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TypeDefSummary {
    pub guid: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
}

impl std::fmt::Display for TypeDefSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) v{}", self.name, self.guid, self.version)
    }
}

fn default_version() -> u64 {
    1
}

// --- Instances ---

/// Identity, type, ownership and provenance shared by every instance.
///
/// `metadata_collection_id` is the home collection: the one repository allowed
/// to change the instance. It is not necessarily the collection that sent the
/// event carrying this header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InstanceHeader {
    pub guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<InstanceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_collection_name: Option<String>,
    #[serde(default)]
    pub instance_provenance: InstanceProvenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated_by: Option<String>,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl InstanceHeader {
    /// A version-1, active, cohort-provenance header homed in `home_collection_id`.
    pub fn new(
        guid: impl Into<String>,
        instance_type: InstanceType,
        home_collection_id: impl Into<String>,
    ) -> Self {
        Self {
            guid: guid.into(),
            instance_type: Some(instance_type),
            metadata_collection_id: Some(home_collection_id.into()),
            metadata_collection_name: None,
            instance_provenance: InstanceProvenance::LocalCohort,
            replicated_by: None,
            status: InstanceStatus::Active,
            version: 1,
            created_by: None,
            updated_by: None,
            create_time: None,
            update_time: None,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_provenance(mut self, provenance: InstanceProvenance) -> Self {
        self.instance_provenance = provenance;
        self
    }

    pub fn type_def_guid(&self) -> Option<&str> {
        self.instance_type.as_ref().map(|t| t.type_def_guid.as_str())
    }

    pub fn type_def_name(&self) -> Option<&str> {
        self.instance_type.as_ref().map(|t| t.type_def_name.as_str())
    }

    pub fn home_collection_id(&self) -> Option<&str> {
        self.metadata_collection_id.as_deref()
    }
}

/// Anything replicated across the cohort exposes its header.
pub trait Instance {
    fn header(&self) -> &InstanceHeader;

    fn guid(&self) -> &str {
        &self.header().guid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: InstanceProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_collection_id: Option<String>,
    #[serde(default)]
    pub version: u64,
}

/// Header and classifications only. What a search typically returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntitySummary {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<Classification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntityDetail {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<Classification>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: InstanceProperties,
}

impl EntityDetail {
    pub fn new(header: InstanceHeader) -> Self {
        Self {
            header,
            classifications: Vec::new(),
            properties: InstanceProperties::new(),
        }
    }

    pub fn summary(&self) -> EntitySummary {
        EntitySummary {
            header: self.header.clone(),
            classifications: self.classifications.clone(),
        }
    }
}

/// Stand-in for an entity at one end of a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntityProxy {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unique_properties: InstanceProperties,
}

impl EntityProxy {
    pub fn new(header: InstanceHeader) -> Self {
        Self {
            header,
            unique_properties: InstanceProperties::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Relationship {
    #[serde(flatten)]
    pub header: InstanceHeader,
    pub entity_one_proxy: EntityProxy,
    pub entity_two_proxy: EntityProxy,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: InstanceProperties,
}

impl Relationship {
    pub fn new(header: InstanceHeader, one: EntityProxy, two: EntityProxy) -> Self {
        Self {
            header,
            entity_one_proxy: one,
            entity_two_proxy: two,
            properties: InstanceProperties::new(),
        }
    }
}

impl Instance for EntitySummary {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }
}

impl Instance for EntityDetail {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }
}

impl Instance for EntityProxy {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }
}

impl Instance for Relationship {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }
}

/// A batch of entities and relationships shipped together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InstanceGraph {
    #[serde(default)]
    pub entities: Vec<EntityDetail>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl InstanceGraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len() + self.relationships.len()
    }
}

// --- Event origin ---

/// The repository that sent an event. Not necessarily the home of the
/// instances it describes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EventOriginator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
}

impl EventOriginator {
    pub fn new(metadata_collection_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            metadata_collection_id: Some(metadata_collection_id.into()),
            server_name: Some(server_name.into()),
            server_type: None,
            organization_name: None,
        }
    }

    pub fn collection_id(&self) -> &str {
        self.metadata_collection_id.as_deref().unwrap_or("<unknown>")
    }

    pub fn server(&self) -> &str {
        self.server_name.as_deref().unwrap_or("<unknown>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_deserializes_with_defaults() {
        let header: InstanceHeader = serde_json::from_value(serde_json::json!({
            "guid": "g1",
            "instance_type": { "type_def_guid": "t1", "type_def_name": "Asset" }
        }))
        .unwrap();

        assert_eq!(header.type_def_guid(), Some("t1"));
        assert_eq!(header.instance_type.unwrap().type_def_version, 1);
        assert_eq!(header.instance_provenance, InstanceProvenance::Unknown);
        assert_eq!(header.status, InstanceStatus::Active);
        assert_eq!(header.version, 0);
        assert!(header.metadata_collection_id.is_none());
    }

    #[test]
    fn entity_detail_flattens_header() {
        let entity = EntityDetail::new(InstanceHeader::new(
            "g1",
            InstanceType::new("t1", "Asset"),
            "home-1",
        ));
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["guid"], "g1");
        assert_eq!(json["metadata_collection_id"], "home-1");
        assert!(json.get("header").is_none());
    }

    #[test]
    fn graph_len_counts_both_kinds() {
        let header = InstanceHeader::new("e1", InstanceType::new("t1", "Asset"), "home");
        let proxy = EntityProxy::new(header.clone());
        let graph = InstanceGraph {
            entities: vec![EntityDetail::new(header.clone())],
            relationships: vec![Relationship::new(
                InstanceHeader::new("r1", InstanceType::new("t2", "Link"), "home"),
                proxy.clone(),
                proxy,
            )],
        };
        assert_eq!(graph.len(), 2);
        assert!(!graph.is_empty());
    }
}
