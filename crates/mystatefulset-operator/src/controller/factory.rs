//! Builds and creates the pod and claims belonging to one ordinal.
use k8s_openapi::{
    api::core::v1::{PersistentVolumeClaim, Pod},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
    Resource, ResourceExt,
    api::ObjectMeta,
    core::DynamicObject,
    runtime::reflector::ObjectRef,
};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    crd::MyStatefulSet,
    labels, naming,
    store::{self, ObjectStore},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to build owner reference, object has no name or uid"))]
    BuildOwnerReference,

    #[snafu(display("failed to create {claim}"))]
    CreateStorageClaim {
        source: store::Error,
        claim: ObjectRef<PersistentVolumeClaim>,
    },

    #[snafu(display("failed to create {instance}"))]
    CreateInstance {
        source: store::Error,
        instance: ObjectRef<Pod>,
    },
}

impl Error {
    pub fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::ObjectHasNoNamespace | Self::BuildOwnerReference => None,
            Self::CreateStorageClaim { claim, .. } => Some(claim.clone().erase()),
            Self::CreateInstance { instance, .. } => Some(instance.clone().erase()),
        }
    }
}

/// Synthesizes the objects of an ordinal from the templates of a
/// `MyStatefulSet`.
pub struct OrdinalResourceFactory<'a> {
    owner: &'a MyStatefulSet,
    owner_name: String,
    namespace: String,
    owner_reference: OwnerReference,
}

impl<'a> OrdinalResourceFactory<'a> {
    pub fn new(owner: &'a MyStatefulSet) -> Result<Self> {
        Ok(Self {
            owner,
            owner_name: owner.name_any(),
            namespace: owner.namespace().context(ObjectHasNoNamespaceSnafu)?,
            owner_reference: owner
                .controller_owner_ref(&())
                .context(BuildOwnerReferenceSnafu)?,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The claims of `ordinal`, one per claim template.
    pub fn build_storage_claims(&self, ordinal: u32) -> Vec<PersistentVolumeClaim> {
        self.owner
            .spec
            .volume_claim_templates
            .iter()
            .map(|template| PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(naming::claim_name(
                        &template.name_any(),
                        &self.owner_name,
                        ordinal,
                    )),
                    namespace: Some(self.namespace.clone()),
                    labels: Some(labels::with_owner(
                        template.metadata.labels.as_ref(),
                        &self.owner_name,
                    )),
                    annotations: template.metadata.annotations.clone(),
                    owner_references: Some(vec![self.owner_reference.clone()]),
                    ..ObjectMeta::default()
                },
                spec: template.spec.clone(),
                status: None,
            })
            .collect()
    }

    /// The pod of `ordinal`, built from the current pod template.
    pub fn build_instance(&self, ordinal: u32) -> Pod {
        let template = &self.owner.spec.template;
        let template_metadata = template.metadata.as_ref();

        Pod {
            metadata: ObjectMeta {
                name: Some(naming::instance_name(&self.owner_name, ordinal)),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels::with_owner(
                    template_metadata.and_then(|metadata| metadata.labels.as_ref()),
                    &self.owner_name,
                )),
                annotations: template_metadata.and_then(|metadata| metadata.annotations.clone()),
                owner_references: Some(vec![self.owner_reference.clone()]),
                ..ObjectMeta::default()
            },
            spec: template.spec.clone(),
            status: None,
        }
    }

    /// Creates the claims of `ordinal`. Claims which already exist are kept
    /// as they are, so a pod gets its old volumes back when recreated.
    pub async fn ensure_storage_claims<S: ObjectStore>(
        &self,
        store: &S,
        ordinal: u32,
    ) -> Result<()> {
        for claim in self.build_storage_claims(ordinal) {
            let claim_name = claim.name_any();
            match store.create(&self.namespace, &claim).await {
                Ok(_) => {
                    tracing::info!(k8s.pvc.name = %claim_name, "created storage claim");
                }
                Err(err) if err.is_already_exists() => {
                    tracing::debug!(k8s.pvc.name = %claim_name, "storage claim already exists");
                }
                Err(err) => {
                    return Err(err).context(CreateStorageClaimSnafu {
                        claim: ObjectRef::new(&claim_name).within(&self.namespace),
                    });
                }
            }
        }

        Ok(())
    }

    /// Creates the pod of `ordinal`. Callers only invoke this for ordinals
    /// without a pod, so every error including a conflict is returned.
    pub async fn ensure_instance<S: ObjectStore>(&self, store: &S, ordinal: u32) -> Result<Pod> {
        let pod = self.build_instance(ordinal);
        let pod_name = pod.name_any();

        let created = store
            .create(&self.namespace, &pod)
            .await
            .with_context(|_| CreateInstanceSnafu {
                instance: ObjectRef::new(&pod_name).within(&self.namespace),
            })?;

        tracing::info!(k8s.pod.name = %pod_name, ordinal, "created pod");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{
        Container, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec,
    };

    use super::*;
    use crate::{
        crd::MyStatefulSetSpec,
        labels::OWNER_LABEL,
        store::memory::{MemoryStore, Verb},
    };

    fn owner() -> MyStatefulSet {
        let mut mss = MyStatefulSet::new(
            "web",
            MyStatefulSetSpec {
                replicas: Some(2),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(BTreeMap::from([("app".to_owned(), "nginx".to_owned())])),
                        annotations: Some(BTreeMap::from([(
                            "team".to_owned(),
                            "storage".to_owned(),
                        )])),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "nginx".to_owned(),
                            image: Some("nginx:latest".to_owned()),
                            ..Container::default()
                        }],
                        ..PodSpec::default()
                    }),
                },
                volume_claim_templates: vec![PersistentVolumeClaim {
                    metadata: ObjectMeta {
                        name: Some("data".to_owned()),
                        ..ObjectMeta::default()
                    },
                    spec: Some(PersistentVolumeClaimSpec {
                        access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                        ..PersistentVolumeClaimSpec::default()
                    }),
                    status: None,
                }],
                ..MyStatefulSetSpec::default()
            },
        );
        mss.metadata.namespace = Some("default".to_owned());
        mss.metadata.uid = Some("c0ffee".to_owned());
        mss
    }

    #[test]
    fn owner_needs_uid() {
        let mut mss = owner();
        mss.metadata.uid = None;

        assert!(matches!(
            OrdinalResourceFactory::new(&mss),
            Err(Error::BuildOwnerReference)
        ));
    }

    #[test]
    fn builds_instance_from_template() {
        let mss = owner();
        let factory = OrdinalResourceFactory::new(&mss).expect("owner is complete");

        let pod = factory.build_instance(1);

        assert_eq!(pod.metadata.name.as_deref(), Some("web-1"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(pod.spec, mss.spec.template.spec);

        let labels = pod.metadata.labels.expect("pod must be labelled");
        assert_eq!(labels.get("app").map(String::as_str), Some("nginx"));
        assert_eq!(labels.get(OWNER_LABEL).map(String::as_str), Some("web"));
        assert_eq!(
            pod.metadata
                .annotations
                .and_then(|a| a.get("team").cloned())
                .as_deref(),
            Some("storage")
        );

        let owner_reference = &pod.metadata.owner_references.expect("owner reference")[0];
        assert_eq!(owner_reference.kind, "MyStatefulSet");
        assert_eq!(owner_reference.uid, "c0ffee");
        assert_eq!(owner_reference.controller, Some(true));
    }

    #[test]
    fn builds_claims_per_template() {
        let mss = owner();
        let factory = OrdinalResourceFactory::new(&mss).expect("owner is complete");

        let claims = factory.build_storage_claims(0);

        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].metadata.name.as_deref(), Some("data-web-0"));
        assert_eq!(claims[0].spec, mss.spec.volume_claim_templates[0].spec);
        assert_eq!(
            claims[0]
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(OWNER_LABEL))
                .map(String::as_str),
            Some("web")
        );
    }

    #[tokio::test]
    async fn existing_claims_are_kept() {
        let mss = owner();
        let factory = OrdinalResourceFactory::new(&mss).expect("owner is complete");
        let store = MemoryStore::new();

        factory
            .ensure_storage_claims(&store, 0)
            .await
            .expect("first ensure creates");
        factory
            .ensure_storage_claims(&store, 0)
            .await
            .expect("second ensure tolerates the conflict");

        assert_eq!(store.names::<PersistentVolumeClaim>("default"), ["data-web-0"]);
        assert_eq!(store.journal().len(), 1);
    }

    #[tokio::test]
    async fn instance_conflict_is_an_error() {
        let mss = owner();
        let factory = OrdinalResourceFactory::new(&mss).expect("owner is complete");
        let store = MemoryStore::new();

        factory
            .ensure_instance(&store, 0)
            .await
            .expect("first create succeeds");
        let err = factory
            .ensure_instance(&store, 0)
            .await
            .expect_err("second create conflicts");

        assert!(matches!(err, Error::CreateInstance { .. }));
        assert_eq!(
            err.secondary_object().map(|object| object.name),
            Some("web-0".to_owned())
        );
    }

    #[tokio::test]
    async fn claim_errors_propagate() {
        let mss = owner();
        let factory = OrdinalResourceFactory::new(&mss).expect("owner is complete");
        let store = MemoryStore::new();
        store.fail_on::<PersistentVolumeClaim>(Verb::Create, None, "quota exceeded");

        let err = factory
            .ensure_storage_claims(&store, 0)
            .await
            .expect_err("claim creation must fail");

        assert!(matches!(err, Error::CreateStorageClaim { .. }));
    }
}
