//! Collects the pods currently owned by a `MyStatefulSet`.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::{
    labels,
    naming,
    store::{self, ObjectStore},
};

/// The pods owned by one `MyStatefulSet`, keyed by ordinal.
#[derive(Debug, Default)]
pub struct ObservedState {
    /// Pods with an ordinal in `[0, replicas)`.
    pub in_range: BTreeMap<u32, Pod>,

    /// Pods with an ordinal of `replicas` or above.
    pub out_of_range: BTreeMap<u32, Pod>,

    /// Pods carrying the owner label whose name does not parse as
    /// `{owner}-{ordinal}`. They are left alone.
    pub unrecognized: Vec<String>,
}

impl ObservedState {
    /// Sorts `pods` by ordinal and splits them at `replicas`.
    pub fn partition(owner: &str, pods: Vec<Pod>, replicas: u32) -> Self {
        let mut observed = Self::default();

        for pod in pods {
            match naming::ordinal_of(owner, &pod.name_any()) {
                Some(ordinal) if ordinal < replicas => {
                    observed.in_range.insert(ordinal, pod);
                }
                Some(ordinal) => {
                    observed.out_of_range.insert(ordinal, pod);
                }
                None => observed.unrecognized.push(pod.name_any()),
            }
        }

        observed
    }

    /// Ordinals in `[0, replicas)` without a pod, in ascending order.
    pub fn missing_ordinals(&self, replicas: u32) -> impl Iterator<Item = u32> + '_ {
        (0..replicas).filter(|ordinal| !self.in_range.contains_key(ordinal))
    }

    /// Names of all pods which are shutting down, in ordinal order.
    pub fn terminating(&self) -> Vec<String> {
        self.in_range
            .values()
            .chain(self.out_of_range.values())
            .filter(|pod| is_terminating(pod))
            .map(ResourceExt::name_any)
            .collect()
    }
}

pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Lists all pods labelled as belonging to `owner` and partitions them.
#[tracing::instrument(skip(store))]
pub async fn collect<S: ObjectStore>(
    store: &S,
    namespace: &str,
    owner: &str,
    replicas: u32,
) -> store::Result<ObservedState> {
    let pods = store
        .list::<Pod>(namespace, &labels::owner_selector(owner))
        .await?;

    let observed = ObservedState::partition(owner, pods, replicas);
    tracing::debug!(
        in_range = observed.in_range.len(),
        out_of_range = observed.out_of_range.len(),
        unrecognized = ?observed.unrecognized,
        "collected observed pods"
    );

    Ok(observed)
}
