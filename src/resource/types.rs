//! Pipeline-defined resource types
//!
//! A pipeline can declare its own resource types on top of the types a
//! worker ships images for. Each custom type names the type it is itself
//! fetched with, forming a chain that must end at a worker base type.

use crate::resource::versioned::{Config, Version};
use serde::{Deserialize, Serialize};

/// A custom resource type declared by a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceType {
    /// Name steps refer to this type by
    pub name: String,
    /// Type used to fetch this type's image (e.g. "registry-image")
    #[serde(rename = "type")]
    pub parent: String,
    /// Source for fetching the image
    #[serde(default)]
    pub source: Config,
    /// Pinned version of the image, if any
    #[serde(default)]
    pub version: Option<Version>,
    /// Whether containers of this type run privileged
    #[serde(default)]
    pub privileged: bool,
}

/// The set of custom resource types visible to a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTypes(Vec<ResourceType>);

impl ResourceTypes {
    pub fn new(types: Vec<ResourceType>) -> Self {
        Self(types)
    }

    pub fn lookup(&self, name: &str) -> Option<&ResourceType> {
        self.0.iter().find(|t| t.name == name)
    }

    /// Follow custom type declarations down to the base type a worker must
    /// provide. Returns `None` on a cycle.
    pub fn base_type<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        let mut current = name;
        for _ in 0..=self.0.len() {
            match self.lookup(current) {
                Some(custom) if custom.parent != current => current = &custom.parent,
                Some(_) => return None,
                None => return Some(current),
            }
        }
        None
    }
}
