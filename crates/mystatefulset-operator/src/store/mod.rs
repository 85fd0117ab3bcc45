//! Access to the objects the controller reads and writes.
//!
//! The controller only talks to the cluster through [`ObjectStore`]. The
//! production implementation is [`KubeStore`], which forwards to the
//! Kubernetes API server. `memory::MemoryStore` keeps everything in process
//! and is used to exercise the reconciliation logic without a cluster. It is
//! only built for tests or with the `test-utils` feature.
use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{Serialize, de::DeserializeOwned};
use snafu::Snafu;

pub use self::cluster::KubeStore;

mod cluster;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{kind} {namespace}/{name} not found"))]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("{kind} {namespace}/{name} already exists"))]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to {verb} {kind} in namespace {namespace:?}"))]
    Kube {
        source: kube::Error,
        verb: &'static str,
        kind: String,
        namespace: String,
    },

    #[snafu(display("failed to convert {kind} {namespace}/{name}"))]
    Convert {
        source: serde_json::Error,
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("{verb} {kind} {namespace}/{name} rejected: {message}"))]
    Rejected {
        verb: &'static str,
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Namespaced objects the store can persist.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// CRUD operations on namespaced objects, as far as the controller needs them.
///
/// Every method is addressed by namespace and name rather than by object so
/// that deletions do not need to fetch the object first.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches a single object, failing with [`Error::NotFound`] if it does
    /// not exist.
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K>;

    /// Lists all objects of kind `K` in `namespace` carrying every label of
    /// `labels`.
    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>;

    /// Creates `object`, failing with [`Error::AlreadyExists`] if an object
    /// of the same kind and name exists.
    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K>;

    /// Requests deletion of an object. Objects with finalizers or a grace
    /// period may stay visible (with a deletion timestamp) afterwards.
    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<()>;

    /// Applies a JSON merge patch (RFC 7386) to an object.
    async fn merge_patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K>;

    /// Like [`ObjectStore::get`], but maps [`Error::NotFound`] to [`None`].
    async fn get_opt<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        match self.get(namespace, name).await {
            Ok(object) => Ok(Some(object)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
