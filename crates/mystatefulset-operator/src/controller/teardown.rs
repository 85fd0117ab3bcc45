//! Removes everything a `MyStatefulSet` owns once it is being deleted.
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::{ResourceExt, core::DynamicObject, runtime::reflector::ObjectRef};
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    crd::{CLEANUP_FINALIZER, MyStatefulSet},
    labels, naming,
    store::{self, ObjectStore, StoreObject},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to list owned pods"))]
    ListInstances { source: store::Error },

    #[snafu(display("failed to list owned claims"))]
    ListStorageClaims { source: store::Error },

    #[snafu(display("failed to delete {instance}"))]
    DeleteInstance {
        source: store::Error,
        instance: ObjectRef<Pod>,
    },

    #[snafu(display("failed to delete {claim}"))]
    DeleteStorageClaim {
        source: store::Error,
        claim: ObjectRef<PersistentVolumeClaim>,
    },

    #[snafu(display("failed to remove finalizer {finalizer:?}"))]
    RemoveFinalizer {
        source: store::Error,
        finalizer: &'static str,
    },
}

impl Error {
    pub fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::DeleteInstance { instance, .. } => Some(instance.clone().erase()),
            Self::DeleteStorageClaim { claim, .. } => Some(claim.clone().erase()),
            _ => None,
        }
    }
}

/// Progress of a [`teardown`] pass.
#[derive(Debug, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// No owned objects are left. If the object was deleted, it is released.
    Complete,

    /// Deletion was requested for everything, but some objects are still
    /// shutting down. The named objects are reported for logging.
    Pending(Vec<String>),
}

/// Deletes all pods of `owner` in ordinal order, each followed by its claims,
/// then sweeps up claims of pods that never existed.
///
/// Once nothing is left and the store has stamped `owner` for deletion, the
/// cleanup finalizer is removed so the store can let go of the object.
#[tracing::instrument(skip_all, fields(mystatefulset.name = %owner.name_any()))]
pub async fn teardown<S: ObjectStore>(store: &S, owner: &MyStatefulSet) -> Result<TeardownOutcome> {
    let namespace = owner.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let owner_name = owner.name_any();
    let selector = labels::owner_selector(&owner_name);

    let mut pods = store
        .list::<Pod>(&namespace, &selector)
        .await
        .context(ListInstancesSnafu)?;
    pods.sort_by_key(|pod| (naming::ordinal_of(&owner_name, &pod.name_any()), pod.name_any()));

    for pod in &pods {
        let pod_name = pod.name_any();
        delete_tolerating_absence::<Pod, _>(store, &namespace, &pod_name)
            .await
            .with_context(|_| DeleteInstanceSnafu {
                instance: ObjectRef::new(&pod_name).within(&namespace),
            })?;
        tracing::info!(k8s.pod.name = %pod_name, "deleted pod");

        for template in &owner.spec.volume_claim_templates {
            let claim_name = naming::claim_name_for_instance(&template.name_any(), &pod_name);
            delete_tolerating_absence::<PersistentVolumeClaim, _>(store, &namespace, &claim_name)
                .await
                .with_context(|_| DeleteStorageClaimSnafu {
                    claim: ObjectRef::new(&claim_name).within(&namespace),
                })?;
            tracing::info!(k8s.pvc.name = %claim_name, "deleted storage claim");
        }
    }

    let claims = store
        .list::<PersistentVolumeClaim>(&namespace, &selector)
        .await
        .context(ListStorageClaimsSnafu)?;
    for claim in claims.iter().filter(|claim| claim.metadata.deletion_timestamp.is_none()) {
        let claim_name = claim.name_any();
        delete_tolerating_absence::<PersistentVolumeClaim, _>(store, &namespace, &claim_name)
            .await
            .with_context(|_| DeleteStorageClaimSnafu {
                claim: ObjectRef::new(&claim_name).within(&namespace),
            })?;
        tracing::info!(k8s.pvc.name = %claim_name, "deleted leftover storage claim");
    }

    let remaining = remaining_children(store, &namespace, &selector).await?;
    if !remaining.is_empty() {
        tracing::info!(?remaining, "waiting for owned objects to shut down");
        return Ok(TeardownOutcome::Pending(remaining));
    }

    if owner.has_deletion_stamp() && owner.has_finalizer(CLEANUP_FINALIZER) {
        let finalizers: Vec<&String> = owner
            .finalizers()
            .iter()
            .filter(|finalizer| *finalizer != CLEANUP_FINALIZER)
            .collect();
        store
            .merge_patch::<MyStatefulSet>(
                &namespace,
                &owner_name,
                &json!({ "metadata": { "finalizers": finalizers } }),
            )
            .await
            .context(RemoveFinalizerSnafu {
                finalizer: CLEANUP_FINALIZER,
            })?;
        tracing::info!(finalizer = CLEANUP_FINALIZER, "removed finalizer");
    }

    Ok(TeardownOutcome::Complete)
}

async fn delete_tolerating_absence<K: StoreObject, S: ObjectStore>(
    store: &S,
    namespace: &str,
    name: &str,
) -> store::Result<()> {
    match store.delete::<K>(namespace, name).await {
        Err(err) if err.is_not_found() => Ok(()),
        result => result,
    }
}

async fn remaining_children<S: ObjectStore>(
    store: &S,
    namespace: &str,
    selector: &std::collections::BTreeMap<String, String>,
) -> Result<Vec<String>> {
    let pods = store
        .list::<Pod>(namespace, selector)
        .await
        .context(ListInstancesSnafu)?;
    let claims = store
        .list::<PersistentVolumeClaim>(namespace, selector)
        .await
        .context(ListStorageClaimsSnafu)?;

    Ok(pods
        .iter()
        .map(ResourceExt::name_any)
        .chain(claims.iter().map(ResourceExt::name_any))
        .collect())
}
