//! The `MyStatefulSet` custom resource.
//!
//! A `MyStatefulSet` declares an ordered group of identical pods. Every pod is
//! named after its owner and ordinal (`web-0`, `web-1`, ...) and gets one
//! persistent volume claim per entry in `volumeClaimTemplates`. Claims are
//! keyed by ordinal and therefore survive pod replacement.
use std::io::Write;

use k8s_openapi::{
    api::{
        apps::v1::StatefulSetUpdateStrategy,
        core::v1::{PersistentVolumeClaim, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const GROUP: &str = "apps.my.com";
pub const KIND: &str = "MyStatefulSet";

/// Finalizer which keeps a `MyStatefulSet` around until all of its pods and
/// claims are gone.
pub const CLEANUP_FINALIZER: &str = "apps.my.com/mystatefulset-cleanup";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize CRD as YAML"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to write CRD YAML to stdout"))]
    WriteToStdout { source: std::io::Error },
}

/// Desired state of a [`MyStatefulSet`].
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "apps.my.com",
    version = "v1",
    kind = "MyStatefulSet",
    plural = "mystatefulsets",
    shortname = "mss",
    status = "MyStatefulSetStatus",
    namespaced,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MyStatefulSetSpec {
    /// Number of desired pods. Defaulted to 1 by the admission webhook.
    ///
    /// The controller refuses to act on an object without a replica count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Label query over pods that should match the replica count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Template every pod is created from.
    #[serde(default)]
    pub template: PodTemplateSpec,

    /// Claims every pod gets a dedicated copy of, named
    /// `{template}-{owner}-{ordinal}`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,

    /// Name of the service governing the pods' network identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Pods are always managed in ordinal order, the field is persisted only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_management_policy: Option<String>,

    /// Pods are always replaced one at a time, the field is persisted only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<StatefulSetUpdateStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,
}

/// Observed state of a [`MyStatefulSet`].
///
/// The controller does not write the status.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyStatefulSetStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_count: Option<i32>,
}

impl MyStatefulSet {
    /// Returns `true` if removal of this object has been requested.
    ///
    /// A finalizer other than [`CLEANUP_FINALIZER`] counts as a request too, so
    /// teardown also runs for objects that carry one but were never deleted.
    /// The cleanup finalizer only takes effect once the deletion stamp is set.
    pub fn is_being_deleted(&self) -> bool {
        self.has_deletion_stamp()
            || self
                .metadata
                .finalizers
                .iter()
                .flatten()
                .any(|finalizer| finalizer.as_str() != CLEANUP_FINALIZER)
    }

    /// Returns `true` if the store has set a deletion timestamp.
    pub fn has_deletion_stamp(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
    }
}

/// Provides YAML output for custom resource definitions.
pub trait CustomResourceExt: kube::CustomResourceExt {
    /// Generates the YAML schema of the `CustomResourceDefinition` and returns
    /// it as an explicit document (with leading `---`).
    fn yaml_schema() -> Result<String> {
        let yaml = serde_yaml::to_string(&Self::crd()).context(SerializeYamlSnafu)?;
        Ok(format!("---\n{yaml}"))
    }

    /// Prints the YAML schema of the `CustomResourceDefinition` to [stdout].
    ///
    /// [stdout]: std::io::stdout
    fn print_yaml_schema() -> Result<()> {
        let yaml = Self::yaml_schema()?;
        std::io::stdout()
            .lock()
            .write_all(yaml.as_bytes())
            .context(WriteToStdoutSnafu)
    }
}

impl<T> CustomResourceExt for T where T: kube::CustomResourceExt {}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::Resource;

    use super::*;

    #[test]
    fn crd_metadata() {
        let crd = <MyStatefulSet as kube::CustomResourceExt>::crd();

        assert_eq!(crd.spec.group, GROUP);
        assert_eq!(crd.spec.names.kind, KIND);
        assert_eq!(crd.spec.names.short_names, Some(vec!["mss".to_owned()]));
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(MyStatefulSet::api_version(&()), "apps.my.com/v1");
    }

    #[test]
    fn yaml_schema_is_explicit_document() {
        let yaml = MyStatefulSet::yaml_schema().expect("CRD must serialize");

        assert!(yaml.starts_with("---\n"));
        assert!(yaml.contains("name: mystatefulsets.apps.my.com"));
    }

    #[test]
    fn deserializes_manifest() {
        let input = indoc! {r#"
            apiVersion: apps.my.com/v1
            kind: MyStatefulSet
            metadata:
              name: web
              namespace: default
            spec:
              replicas: 3
              serviceName: web
              template:
                metadata:
                  labels:
                    app: nginx
                spec:
                  containers:
                    - name: nginx
                      image: nginx:latest
              volumeClaimTemplates:
                - metadata:
                    name: data
                  spec:
                    accessModes: ["ReadWriteOnce"]
                    resources:
                      requests:
                        storage: 1Gi
        "#};

        let mss: MyStatefulSet = serde_yaml::from_str(input).expect("manifest must be valid");

        assert_eq!(mss.spec.replicas, Some(3));
        assert_eq!(mss.spec.service_name.as_deref(), Some("web"));
        assert_eq!(mss.spec.volume_claim_templates.len(), 1);
        assert!(mss.status.is_none());
        assert!(!mss.is_being_deleted());
    }

    #[test]
    fn missing_replicas_stays_absent() {
        let mss: MyStatefulSet = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps.my.com/v1",
            "kind": "MyStatefulSet",
            "metadata": {"name": "web"},
            "spec": {"template": {}}
        }))
        .expect("object must be valid");

        assert_eq!(mss.spec.replicas, None);
    }

    #[test]
    fn deletion_triggers() {
        let mut mss = MyStatefulSet::new("web", MyStatefulSetSpec::default());
        assert!(!mss.is_being_deleted());

        mss.metadata.finalizers = Some(vec![]);
        assert!(!mss.is_being_deleted());

        mss.metadata.finalizers = Some(vec![CLEANUP_FINALIZER.to_owned()]);
        assert!(!mss.is_being_deleted());
        assert!(mss.has_finalizer(CLEANUP_FINALIZER));

        mss.metadata.finalizers = Some(vec![
            CLEANUP_FINALIZER.to_owned(),
            "example.com/protect".to_owned(),
        ]);
        assert!(mss.is_being_deleted());
        assert!(!mss.has_deletion_stamp());

        mss.metadata.finalizers = None;
        mss.metadata.deletion_timestamp = Some(Time(jiff::Timestamp::UNIX_EPOCH));
        assert!(mss.is_being_deleted());
        assert!(mss.has_deletion_stamp());
    }
}
