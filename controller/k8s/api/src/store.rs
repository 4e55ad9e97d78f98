//! A minimal view of the cluster API: typed get, create, update, status
//! update and delete with optimistic concurrency.

use k8s_openapi::NamespaceResourceScope;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

mod client;
mod memory;

pub use self::{client::KubeStore, memory::MemoryStore};

/// A namespaced resource the store can persist.
pub trait Object:
    kube::Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> Object for T where
    T: kube::Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} has been modified")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("invalid object: {0}")]
    Invalid(&'static str),

    #[error("failed to encode object: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Typed access to namespaced cluster objects.
///
/// Updates carry the object's `resourceVersion`; a stale version fails with
/// [`StoreError::Conflict`].
#[async_trait::async_trait]
pub trait ObjectStore: Clone + Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K, StoreError>;

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError>;

    /// Replaces the object. The status subresource is left untouched.
    async fn update<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError>;

    /// Replaces only the status subresource.
    async fn update_status<K: Object>(&self, namespace: &str, obj: &K) -> Result<K, StoreError>;

    /// Deletes the object, or marks it as deleted while finalizers remain.
    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

// === impl StoreError ===

impl StoreError {
    fn not_found<K: Object>(namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn already_exists<K: Object>(namespace: &str, name: &str) -> Self {
        Self::AlreadyExists {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn conflict<K: Object>(namespace: &str, name: &str) -> Self {
        Self::Conflict {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

fn object_name<K: Object>(obj: &K) -> Result<String, StoreError> {
    obj.meta()
        .name
        .clone()
        .ok_or(StoreError::Invalid("object has no name"))
}
