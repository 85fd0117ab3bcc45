//! A ready-to-use HTTPS server for Kubernetes admission webhooks.
//!
//! Webhooks implement [`webhooks::Webhook`] and register their routes on an
//! Axum router. The [`WebhookServer`] adds a `/health` route, request tracing
//! and TLS termination using a certificate and key mounted from files.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use k8s_openapi::api::core::v1::Pod;
//! use kube::core::admission::{AdmissionRequest, AdmissionResponse};
//! use mystatefulset_webhook::{
//!     WebhookServer, WebhookServerOptions,
//!     webhooks::{ValidatingWebhook, Webhook},
//! };
//!
//! async fn allow_all(_state: Arc<()>, request: AdmissionRequest<Pod>) -> AdmissionResponse {
//!     AdmissionResponse::from(&request)
//! }
//!
//! # async fn docs() -> mystatefulset_webhook::Result<()> {
//! let webhook: Box<dyn Webhook> =
//!     Box::new(ValidatingWebhook::new("allow-all", allow_all, Arc::new(())));
//! let server = WebhookServer::new(vec![webhook], WebhookServerOptions::default())?;
//! server.run(std::future::pending()).await?;
//! # Ok(())
//! # }
//! ```
use axum::{Router, routing::get};
use futures_util::{future, pin_mut};
use snafu::{ResultExt, Snafu};
use tower_http::trace::TraceLayer;

use crate::{tls::TlsServer, webhooks::Webhook};

pub mod constants;
pub mod options;
pub mod tls;
pub mod webhooks;

pub use crate::options::WebhookServerOptions;

/// A result type alias with the [`WebhookError`] type as the default error type.
pub type Result<T, E = WebhookError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum WebhookError {
    #[snafu(display("failed to create TLS server"))]
    CreateTlsServer { source: tls::TlsServerError },

    #[snafu(display("failed to run TLS server"))]
    RunTlsServer { source: tls::TlsServerError },
}

/// A ready-to-use webhook server.
///
/// This server abstracts away TLS termination and request tracing. The routes
/// are contributed by the passed [`Webhook`]s.
pub struct WebhookServer {
    tls_server: TlsServer,
}

impl WebhookServer {
    /// Creates a new webhook server serving all routes of `webhooks`.
    ///
    /// The TLS certificate and key are read from the paths in `options`
    /// once, at construction time.
    pub fn new(webhooks: Vec<Box<dyn Webhook>>, options: WebhookServerOptions) -> Result<Self> {
        tracing::trace!("create new webhook server");

        let router = Self::router(&webhooks);

        tracing::debug!("create TLS server");
        let tls_server = TlsServer::new(&options, router).context(CreateTlsServerSnafu)?;

        Ok(Self { tls_server })
    }

    fn router(webhooks: &[Box<dyn Webhook>]) -> Router {
        let router = webhooks
            .iter()
            .fold(Router::new(), |router, webhook| webhook.register_routes(router))
            .layer(TraceLayer::new_for_http());

        // The health route is below the trace layer so probes are not traced
        router.route("/health", get(|| async { "ok" }))
    }

    /// Runs the webhook server until `shutdown` completes.
    ///
    /// This does not implement graceful shutdown of in-flight connections.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let server = self.tls_server.run();
        pin_mut!(server);
        pin_mut!(shutdown);

        match future::select(server, shutdown).await {
            future::Either::Left((result, _)) => result.context(RunTlsServerSnafu),
            future::Either::Right(((), _)) => {
                tracing::debug!("webhook server shutting down");
                Ok(())
            }
        }
    }
}
