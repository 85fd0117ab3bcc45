use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::{
    Api, Client,
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
};
use snafu::IntoError;

use super::{
    AlreadyExistsSnafu, Error, KubeSnafu, NotFoundSnafu, ObjectStore, Result, StoreObject,
};
use crate::labels;

/// An [`ObjectStore`] backed by the Kubernetes API server.
///
/// It wraps an underlying [`kube::Client`] and sends all writes with the
/// configured field manager.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    post_params: PostParams,
    merge_patch_params: PatchParams,
    delete_params: DeleteParams,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: Option<String>) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager: field_manager.clone(),
                ..PostParams::default()
            },
            merge_patch_params: PatchParams {
                field_manager,
                ..PatchParams::default()
            },
            delete_params: DeleteParams::default(),
        }
    }

    /// Returns a [`kube::Client`] that can be freely used.
    pub fn as_kube_client(&self) -> Client {
        self.client.clone()
    }

    fn api<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Maps well-known API errors to the store's own variants, so callers do not
/// need to look at HTTP status codes.
fn classify<K: StoreObject>(
    err: kube::Error,
    verb: &'static str,
    namespace: &str,
    name: &str,
) -> Error {
    let kind = K::kind(&()).into_owned();
    let (not_found, already_exists) = match &err {
        kube::Error::Api(response) => (response.code == 404, response.reason == "AlreadyExists"),
        _ => (false, false),
    };

    if not_found {
        NotFoundSnafu {
            kind,
            namespace,
            name,
        }
        .build()
    } else if already_exists {
        AlreadyExistsSnafu {
            kind,
            namespace,
            name,
        }
        .build()
    } else {
        KubeSnafu {
            verb,
            kind,
            namespace,
        }
        .into_error(err)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    #[tracing::instrument(skip(self), fields(kind = %K::kind(&())))]
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|err| classify::<K>(err, "get", namespace, name))
    }

    #[tracing::instrument(skip(self), fields(kind = %K::kind(&())))]
    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let list_params = ListParams::default().labels(&labels::selector_string(labels));
        let list = self
            .api(namespace)
            .list(&list_params)
            .await
            .map_err(|err| classify::<K>(err, "list", namespace, ""))?;

        Ok(list.items)
    }

    #[tracing::instrument(skip(self, object), fields(kind = %K::kind(&())))]
    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object.meta().name.clone().unwrap_or_default();
        self.api(namespace)
            .create(&self.post_params, object)
            .await
            .map_err(|err| classify::<K>(err, "create", namespace, &name))
    }

    #[tracing::instrument(skip(self), fields(kind = %K::kind(&())))]
    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<()> {
        self.api::<K>(namespace)
            .delete(name, &self.delete_params)
            .await
            .map_err(|err| classify::<K>(err, "delete", namespace, name))?;

        Ok(())
    }

    #[tracing::instrument(skip(self, patch), fields(kind = %K::kind(&())))]
    async fn merge_patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K> {
        self.api(namespace)
            .patch(name, &self.merge_patch_params, &Patch::Merge(patch))
            .await
            .map_err(|err| classify::<K>(err, "patch", namespace, name))
    }
}
