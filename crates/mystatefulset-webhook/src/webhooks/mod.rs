//! Admission webhooks which can be mounted into a [`WebhookServer`][crate::WebhookServer].
use axum::Router;

pub use mutating_webhook::MutatingWebhook;
pub use validating_webhook::ValidatingWebhook;

mod mutating_webhook;
mod validating_webhook;

/// A webhook (such as a mutating or validating webhook) needs to implement this trait.
pub trait Webhook: Send + Sync {
    /// The webhook can add arbitrary routes to the passed [`Router`] and needs to return the
    /// resulting [`Router`].
    fn register_routes(&self, router: Router) -> Router;
}
