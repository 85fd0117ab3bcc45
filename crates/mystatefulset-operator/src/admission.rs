//! Admission webhooks for `MyStatefulSet`.
//!
//! The defaulter fills in a missing replica count, the validator rejects
//! objects the controller cannot act on. The controller does not rely on
//! either having run.
use std::sync::Arc;

use kube::{
    ResourceExt,
    core::admission::{AdmissionRequest, AdmissionResponse, Operation},
};
use mystatefulset_webhook::webhooks::{MutatingWebhook, ValidatingWebhook, Webhook};
use serde_json::json;
use snafu::{ResultExt, Snafu};

use crate::crd::MyStatefulSet;

/// Name both webhooks are registered under.
pub const WEBHOOK_NAME: &str = "apps-my-com-v1-mystatefulset";

pub const DEFAULT_REPLICAS: i32 = 1;

#[derive(Debug, Snafu)]
pub enum DefaultingError {
    #[snafu(display("failed to build defaulting patch"))]
    BuildPatch { source: serde_json::Error },
}

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ValidationError {
    #[snafu(display("replicas must be greater than or equal to 1, got {replicas}"))]
    ReplicasBelowOne { replicas: i32 },

    #[snafu(display("spec.volumeClaimTemplates[{index}] must have a metadata.name"))]
    UnnamedClaimTemplate { index: usize },
}

/// Returns the mutating and validating webhook for `MyStatefulSet`.
pub fn webhooks() -> Vec<Box<dyn Webhook>> {
    let defaulter: Box<dyn Webhook> = Box::new(MutatingWebhook::<_, _, MyStatefulSet>::new(
        WEBHOOK_NAME,
        default_mystatefulset,
        Arc::new(()),
    ));
    let validator: Box<dyn Webhook> = Box::new(ValidatingWebhook::<_, _, MyStatefulSet>::new(
        WEBHOOK_NAME,
        validate_mystatefulset,
        Arc::new(()),
    ));

    vec![defaulter, validator]
}

/// The JSON patch defaulting `mss`, or [`None`] if nothing is missing.
pub fn defaulting_patch(mss: &MyStatefulSet) -> Result<Option<json_patch::Patch>, DefaultingError> {
    if mss.spec.replicas.is_some() {
        return Ok(None);
    }

    let patch = serde_json::from_value(json!([
        { "op": "add", "path": "/spec/replicas", "value": DEFAULT_REPLICAS }
    ]))
    .context(BuildPatchSnafu)?;

    Ok(Some(patch))
}

/// Checks the parts of `mss` which cannot be expressed in the CRD schema.
///
/// An absent replica count passes, it is the defaulter's job to fill it in.
pub fn validate(mss: &MyStatefulSet) -> Result<(), ValidationError> {
    if let Some(replicas) = mss.spec.replicas.filter(|replicas| *replicas < 1) {
        return ReplicasBelowOneSnafu { replicas }.fail();
    }

    if let Some(index) = mss
        .spec
        .volume_claim_templates
        .iter()
        .position(|template| template.metadata.name.as_deref().is_none_or(str::is_empty))
    {
        return UnnamedClaimTemplateSnafu { index }.fail();
    }

    Ok(())
}

pub async fn default_mystatefulset(
    _state: Arc<()>,
    request: AdmissionRequest<MyStatefulSet>,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(&request);
    let Some(mss) = &request.object else {
        return response;
    };

    match defaulting_patch(mss) {
        Ok(None) => response,
        Ok(Some(patch)) => {
            tracing::info!(
                mystatefulset.name = %mss.name_any(),
                replicas = DEFAULT_REPLICAS,
                "defaulting replica count"
            );
            response
                .with_patch(patch)
                .unwrap_or_else(|err| AdmissionResponse::invalid(err.to_string()))
        }
        Err(err) => AdmissionResponse::invalid(err.to_string()),
    }
}

pub async fn validate_mystatefulset(
    _state: Arc<()>,
    request: AdmissionRequest<MyStatefulSet>,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(&request);
    if matches!(request.operation, Operation::Delete) {
        return response;
    }

    let Some(mss) = &request.object else {
        return response;
    };

    match validate(mss) {
        Ok(()) => response,
        Err(err) => {
            tracing::info!(
                mystatefulset.name = %mss.name_any(),
                operation = ?request.operation,
                reason = %err,
                "denied admission"
            );
            response.deny(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::PersistentVolumeClaim;
    use kube::{api::ObjectMeta, core::admission::AdmissionReview};
    use rstest::rstest;
    use serde_json::Value;

    use super::*;
    use crate::crd::MyStatefulSetSpec;

    fn mss(replicas: Option<i32>) -> MyStatefulSet {
        MyStatefulSet::new(
            "web",
            MyStatefulSetSpec {
                replicas,
                ..MyStatefulSetSpec::default()
            },
        )
    }

    fn request(operation: &str, object: &MyStatefulSet) -> AdmissionRequest<MyStatefulSet> {
        let old_object = if operation == "UPDATE" {
            json!(object)
        } else {
            Value::Null
        };
        let review: AdmissionReview<MyStatefulSet> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "4b2c9b7e-3f4c-4c3e-9d0e-0a1b2c3d4e5f",
                "kind": {"group": "apps.my.com", "version": "v1", "kind": "MyStatefulSet"},
                "resource": {"group": "apps.my.com", "version": "v1", "resource": "mystatefulsets"},
                "name": "web",
                "namespace": "default",
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": old_object,
                "dryRun": false
            }
        }))
        .expect("review must be valid");

        review.try_into().expect("review must contain a request")
    }

    fn review_response(response: AdmissionResponse) -> Value {
        serde_json::to_value(response.into_review()).expect("review must serialize")["response"]
            .clone()
    }

    #[test]
    fn defaulting_patch_adds_replicas() {
        let patch = defaulting_patch(&mss(None))
            .expect("patch must build")
            .expect("replicas are missing");

        assert_eq!(
            serde_json::to_value(patch).expect("patch must serialize"),
            json!([{ "op": "add", "path": "/spec/replicas", "value": 1 }])
        );
        assert!(defaulting_patch(&mss(Some(0))).expect("no patch needed").is_none());
    }

    #[rstest]
    #[case(None, Ok(()))]
    #[case(Some(1), Ok(()))]
    #[case(Some(5), Ok(()))]
    #[case(Some(0), Err(ValidationError::ReplicasBelowOne { replicas: 0 }))]
    #[case(Some(-3), Err(ValidationError::ReplicasBelowOne { replicas: -3 }))]
    fn replica_validation(
        #[case] replicas: Option<i32>,
        #[case] expected: Result<(), ValidationError>,
    ) {
        assert_eq!(validate(&mss(replicas)), expected);
    }

    #[test]
    fn unnamed_claim_templates_are_rejected() {
        let mut object = mss(Some(1));
        object.spec.volume_claim_templates = vec![
            PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("data".to_owned()),
                    ..ObjectMeta::default()
                },
                ..PersistentVolumeClaim::default()
            },
            PersistentVolumeClaim::default(),
        ];

        assert_eq!(
            validate(&object),
            Err(ValidationError::UnnamedClaimTemplate { index: 1 })
        );
    }

    #[tokio::test]
    async fn defaulter_patches_only_when_needed() {
        let response = review_response(
            default_mystatefulset(Arc::new(()), request("CREATE", &mss(None))).await,
        );
        assert_eq!(response["allowed"], true);
        assert_eq!(response["patchType"], "JSONPatch");
        assert!(!response["patch"].is_null());

        let response = review_response(
            default_mystatefulset(Arc::new(()), request("CREATE", &mss(Some(2)))).await,
        );
        assert_eq!(response["allowed"], true);
        assert!(response["patch"].is_null());
    }

    #[rstest]
    #[case("CREATE", Some(0), false)]
    #[case("CREATE", Some(1), true)]
    #[case("UPDATE", Some(0), false)]
    #[case("UPDATE", Some(2), true)]
    #[case("DELETE", Some(0), true)]
    #[tokio::test]
    async fn validator_gates_create_and_update(
        #[case] operation: &str,
        #[case] replicas: Option<i32>,
        #[case] allowed: bool,
    ) {
        let response = review_response(
            validate_mystatefulset(Arc::new(()), request(operation, &mss(replicas))).await,
        );

        assert_eq!(response["allowed"], allowed);
        if !allowed {
            assert_eq!(
                response["status"]["message"],
                "replicas must be greater than or equal to 1, got 0"
            );
        }
    }

    #[test]
    fn webhooks_are_registered() {
        assert_eq!(webhooks().len(), 2);
    }
}
