use std::{marker::PhantomData, sync::Arc};

use axum::{Json, Router, routing::post};
use kube::{
    Resource,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
};
use serde::{Serialize, de::DeserializeOwned};

use super::Webhook;

/// Validating webhook, which lets you intercept object creations/modifications/deletions and
/// allow or deny them.
///
/// As the webhook is typed with the Resource type `R`, it can only handle a single resource
/// kind. The route is `/validate/{name}`, where `name` matches the name of the
/// ValidatingWebhookConfiguration pointing at it.
///
/// ```
/// use std::sync::Arc;
///
/// use k8s_openapi::api::core::v1::Pod;
/// use kube::core::admission::{AdmissionRequest, AdmissionResponse};
/// use mystatefulset_webhook::webhooks::ValidatingWebhook;
///
/// async fn handler(_state: Arc<()>, request: AdmissionRequest<Pod>) -> AdmissionResponse {
///     AdmissionResponse::from(&request)
/// }
///
/// let webhook: ValidatingWebhook<_, _, Pod> = ValidatingWebhook::new("pod-validator", handler, Arc::new(()));
/// ```
pub struct ValidatingWebhook<H, S, R> {
    name: String,

    /// The async handler that gets an [`AdmissionRequest`] and returns an [`AdmissionResponse`]
    handler: H,

    /// State passed into every handler invocation.
    handler_state: Arc<S>,

    _resource: PhantomData<R>,
}

impl<H, S, R> ValidatingWebhook<H, S, R> {
    pub fn new(name: impl Into<String>, handler: H, handler_state: Arc<S>) -> Self {
        Self {
            name: name.into(),
            handler,
            handler_state,
            _resource: PhantomData,
        }
    }

    pub fn http_path(&self) -> String {
        format!("/validate/{name}", name = self.name)
    }
}

impl<H, S, R, Fut> Webhook for ValidatingWebhook<H, S, R>
where
    H: Fn(Arc<S>, AdmissionRequest<R>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = AdmissionResponse> + Send + 'static,
    R: Resource + Send + Sync + DeserializeOwned + Serialize + 'static,
    S: Send + Sync + 'static,
{
    fn register_routes(&self, router: Router) -> Router {
        let handler_state = self.handler_state.clone();
        let handler = self.handler.clone();
        let handler_fn = |Json(review): Json<AdmissionReview<R>>| async move {
            let request: AdmissionRequest<R> = match review.try_into() {
                Ok(request) => request,
                Err(err) => {
                    return Json(
                        AdmissionResponse::invalid(format!("failed to convert to request: {err}"))
                            .into_review(),
                    );
                }
            };

            let response = handler(handler_state, request).await;
            Json(response.into_review())
        };

        let route = self.http_path();
        tracing::debug!(route = %route, "registering route for validating webhook");
        router.route(&route, post(handler_fn))
    }
}
