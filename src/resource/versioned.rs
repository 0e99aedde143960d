//! Versions, metadata and the versioned source produced by a fetch

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque version of a resource (e.g. `{"ref": "abc123"}`)
pub type Version = BTreeMap<String, String>;

/// Opaque key/value configuration (resource source or get params)
pub type Config = serde_json::Map<String, serde_json::Value>;

/// One provenance entry emitted by a resource's get
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

impl MetadataField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered provenance metadata for a fetched resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Vec<MetadataField>);

impl Metadata {
    pub fn new(fields: Vec<MetadataField>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[MetadataField] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First value recorded under `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// Result of a fetch or cache hit: the resolved version plus its metadata
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedSource {
    version: Version,
    metadata: Metadata,
}

impl VersionedSource {
    pub fn new(version: Version, metadata: Metadata) -> Self {
        Self { version, metadata }
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_lookup() {
        let metadata = Metadata::new(vec![
            MetadataField::new("commit", "abc123"),
            MetadataField::new("author", "ci"),
        ]);

        assert_eq!(metadata.get("commit"), Some("abc123"));
        assert_eq!(metadata.get("missing"), None);
        assert_eq!(metadata.fields().len(), 2);
    }

    #[test]
    fn versioned_source_serializes_metadata_as_list() {
        let mut version = Version::new();
        version.insert("ref".to_string(), "abc123".to_string());
        let source = VersionedSource::new(
            version,
            Metadata::new(vec![MetadataField::new("commit", "abc123")]),
        );

        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["version"]["ref"], "abc123");
        assert_eq!(json["metadata"][0]["name"], "commit");
        assert_eq!(json["metadata"][0]["value"], "abc123");
    }
}
