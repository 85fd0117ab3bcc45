//! Removes pods beyond the desired replica count.
use k8s_openapi::api::core::v1::Pod;
use kube::{ResourceExt, core::DynamicObject, runtime::reflector::ObjectRef};
use snafu::{ResultExt, Snafu};

use super::observed::{ObservedState, is_terminating};
use crate::store::{self, ObjectStore};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to delete surplus {instance}"))]
    DeleteInstance {
        source: store::Error,
        instance: ObjectRef<Pod>,
    },
}

impl Error {
    pub fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::DeleteInstance { instance, .. } => Some(instance.clone().erase()),
        }
    }
}

/// Deletes the surplus pod with the highest ordinal and returns its name.
///
/// Claims stay behind, a later scale-up hands them to the recreated pod.
#[tracing::instrument(skip(store, observed))]
pub async fn scale_down_one<S: ObjectStore>(
    store: &S,
    namespace: &str,
    observed: &ObservedState,
) -> Result<Option<String>, Error> {
    let Some((ordinal, pod)) = observed
        .out_of_range
        .iter()
        .rev()
        .find(|(_, pod)| !is_terminating(pod))
    else {
        return Ok(None);
    };

    let pod_name = pod.name_any();
    tracing::info!(k8s.pod.name = %pod_name, ordinal, "removing surplus pod");

    match store.delete::<Pod>(namespace, &pod_name).await {
        Ok(()) => Ok(Some(pod_name)),
        Err(err) if err.is_not_found() => Ok(Some(pod_name)),
        Err(err) => Err(err).context(DeleteInstanceSnafu {
            instance: ObjectRef::new(&pod_name).within(namespace),
        }),
    }
}
