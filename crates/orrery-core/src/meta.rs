//! Object identity and metadata.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Label set attached to an object.
pub type Labels = BTreeMap<String, String>;

/// Unique identifier assigned to an object when it is created.
///
/// Unlike names, unique ids are never reused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Create a unique id from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique id using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Namespace-qualified object name, rendered as `namespace/name`.
///
/// Objects without a namespace render as the bare name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace, empty for cluster-scoped objects.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Create a key from a namespace and name.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Split a `namespace/name` string into a key.
    ///
    /// A string without a separator is treated as a cluster-scoped name.
    pub fn parse(key: &str) -> CoreResult<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [name] => Ok(Self::new("", *name)),
            [namespace, name] => Ok(Self::new(*namespace, *name)),
            _ => Err(CoreError::InvalidKey(key.to_owned())),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Typed back-reference from a subordinate object to its owner.
///
/// Resolving a reference requires a lookup by namespace and name followed by
/// a unique id comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    /// Kind of the owning object.
    pub kind: String,
    /// Name of the owning object.
    pub name: String,
    /// Unique id of the owning object.
    pub uid: Uid,
    /// Whether the owner is the managing controller.
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    /// Build a controller reference pointing at `owner`.
    #[must_use]
    pub fn controller_of<R: Resource>(owner: &R) -> Self {
        Self {
            kind: R::KIND.to_owned(),
            name: owner.meta().name.clone(),
            uid: owner.meta().uid.clone(),
            controller: true,
        }
    }

    /// Check whether this reference points at `owner` by kind and unique id.
    #[must_use]
    pub fn refers_to<R: Resource>(&self, owner: &R) -> bool {
        self.kind == R::KIND && self.uid == owner.meta().uid
    }
}

/// Metadata common to every object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name, unique within the namespace.
    pub name: String,
    /// Namespace the object lives in.
    pub namespace: String,
    /// Unique id assigned at creation.
    #[serde(default)]
    pub uid: Uid,
    /// Opaque version bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
    /// Sequence number of spec changes.
    #[serde(default)]
    pub generation: i64,
    /// Labels used for selection.
    #[serde(default)]
    pub labels: Labels,
    /// Free-form annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// References to owning objects.
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    /// When the object was created.
    #[serde(default)]
    pub creation_timestamp: DateTime<Utc>,
    /// Set once deletion of the object has been requested.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Create metadata for a new object.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            creation_timestamp: Utc::now(),
            ..Self::default()
        }
    }

    /// The managing controller's reference, if any.
    #[must_use]
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// Whether deletion has been requested.
    #[must_use]
    pub const fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Get an annotation value.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// An object stored in the cluster.
pub trait Resource: Clone + fmt::Debug + Send + Sync + 'static {
    /// Kind name recorded in owner references.
    const KIND: &'static str;

    /// Object metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Mutable object metadata.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Namespace-qualified key of this object.
    fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.meta().namespace, &self.meta().name)
    }

    /// The managing controller's reference, if any.
    fn controller_ref(&self) -> Option<&OwnerReference> {
        self.meta().controller_ref()
    }
}
