//! Replaces pods which no longer match the pod template, one at a time.
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use kube::{ResourceExt, core::DynamicObject, runtime::reflector::ObjectRef};
use snafu::{ResultExt, Snafu};

use super::{factory::OrdinalResourceFactory, observed::ObservedState};
use crate::store::{self, ObjectStore};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to delete outdated {instance}"))]
    DeleteInstance {
        source: store::Error,
        instance: ObjectRef<Pod>,
    },

    #[snafu(display("failed to check whether {instance} is gone"))]
    CheckInstance {
        source: store::Error,
        instance: ObjectRef<Pod>,
    },

    #[snafu(display("failed to recreate pod with ordinal {ordinal}"))]
    RecreateInstance {
        source: super::factory::Error,
        ordinal: u32,
    },
}

impl Error {
    pub fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::DeleteInstance { instance, .. } | Self::CheckInstance { instance, .. } => {
                Some(instance.clone().erase())
            }
            Self::RecreateInstance { source, .. } => source.secondary_object(),
        }
    }
}

/// What [`apply_one_update`] did.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Every pod matches the template.
    UpToDate,

    /// The named pod was deleted and created again from the template.
    Replaced(String),

    /// The named pod was deleted and is still shutting down. It is recreated
    /// by a later pass once it is gone.
    Terminating(String),
}

/// Returns `true` if `instance` no longer matches `template`.
///
/// Containers are compared by count and by image at each position. Every
/// label and annotation of the template must be present on the pod with the
/// same value, additional ones on the pod are fine.
pub fn needs_update(instance: &Pod, template: &PodTemplateSpec) -> bool {
    let instance_containers = instance
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();
    let template_containers = template
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();

    if instance_containers.len() != template_containers.len() {
        return true;
    }

    if instance_containers
        .iter()
        .zip(template_containers)
        .any(|(actual, desired)| actual.image != desired.image)
    {
        return true;
    }

    let Some(template_metadata) = template.metadata.as_ref() else {
        return false;
    };

    !is_subset(template_metadata.labels.as_ref(), instance.metadata.labels.as_ref())
        || !is_subset(
            template_metadata.annotations.as_ref(),
            instance.metadata.annotations.as_ref(),
        )
}

fn is_subset(
    expected: Option<&std::collections::BTreeMap<String, String>>,
    actual: Option<&std::collections::BTreeMap<String, String>>,
) -> bool {
    expected.is_none_or(|expected| {
        expected.iter().all(|(key, value)| {
            actual
                .and_then(|actual| actual.get(key))
                .is_some_and(|actual| actual == value)
        })
    })
}

/// Replaces the lowest-ordinal pod which diverges from the current template.
///
/// The pod is deleted first. If the store confirms it is gone, it is
/// recreated right away. Otherwise the pod is terminating gracefully and the
/// caller should come back later, the regular fill of missing ordinals then
/// recreates it.
#[tracing::instrument(skip_all)]
pub async fn apply_one_update<S: ObjectStore>(
    store: &S,
    factory: &OrdinalResourceFactory<'_>,
    observed: &ObservedState,
    template: &PodTemplateSpec,
) -> Result<UpdateOutcome> {
    let Some((&ordinal, pod)) = observed
        .in_range
        .iter()
        .find(|(_, pod)| needs_update(pod, template))
    else {
        return Ok(UpdateOutcome::UpToDate);
    };

    let namespace = factory.namespace();
    let pod_name = pod.name_any();
    let instance = || ObjectRef::<Pod>::new(&pod_name).within(namespace);

    tracing::info!(k8s.pod.name = %pod_name, ordinal, "replacing outdated pod");
    match store.delete::<Pod>(namespace, &pod_name).await {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {
            tracing::debug!(k8s.pod.name = %pod_name, "outdated pod was already gone");
        }
        Err(err) => return Err(err).context(DeleteInstanceSnafu { instance: instance() }),
    }

    let remaining = store
        .get_opt::<Pod>(namespace, &pod_name)
        .await
        .context(CheckInstanceSnafu { instance: instance() })?;
    if remaining.is_some() {
        tracing::info!(k8s.pod.name = %pod_name, "outdated pod is still terminating");
        return Ok(UpdateOutcome::Terminating(pod_name));
    }

    factory
        .ensure_storage_claims(store, ordinal)
        .await
        .context(RecreateInstanceSnafu { ordinal })?;
    factory
        .ensure_instance(store, ordinal)
        .await
        .context(RecreateInstanceSnafu { ordinal })?;

    Ok(UpdateOutcome::Replaced(pod_name))
}
