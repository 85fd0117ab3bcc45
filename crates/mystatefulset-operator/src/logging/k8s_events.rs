//! Utilities for publishing Kubernetes events
use std::{error::Error, fmt::Write};

use kube::runtime::{
    controller,
    events::{Event, EventType, Recorder},
};

use super::controller::ReconcilerError;

/// Upper bound of an event note accepted by the API server
const MAX_NOTE_LEN: usize = 1024;

/// Converts an [`Error`] into a publishable Kubernetes [`Event`]
fn error_to_event<E: ReconcilerError>(err: &E) -> Event {
    // Walk the whole error chain, so that the note carries the full reason
    let mut note = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        // Writing into a String cannot fail
        let _ = write!(note, ": {cause}");
        source = cause.source();
    }
    message::truncate_with_ellipsis(&mut note, MAX_NOTE_LEN);

    Event {
        type_: EventType::Warning,
        reason: err.category().to_owned(),
        note: Some(note),
        action: "Reconcile".to_owned(),
        secondary: err.secondary_object().map(Into::into),
    }
}

/// Reports an error coming from a controller to Kubernetes
///
/// This is intended to be executed on the log entries returned by
/// [`kube::runtime::Controller::run`]
#[tracing::instrument(skip(recorder))]
pub async fn publish_controller_error_as_k8s_event<ReconcileErr, QueueErr>(
    recorder: &Recorder,
    controller_error: &controller::Error<ReconcileErr, QueueErr>,
) where
    ReconcileErr: ReconcilerError,
    QueueErr: Error,
{
    let controller::Error::ReconcilerFailed(error, obj) = controller_error else {
        // Other error types are intended for the operator administrator, and aren't
        // linked to a specific object
        return;
    };

    let event = error_to_event(error);
    if let Err(err) = recorder.publish(&event, &obj.clone().into()).await {
        tracing::error!(
            error = &err as &dyn Error,
            "Failed to report error as K8s event"
        );
    }
}

mod message {
    const ELLIPSIS: char = '…';

    /// Ensures that `msg` is at most `max_len` _bytes_ long
    ///
    /// If `msg` is longer than `max_len` then the extra text is replaced with an ellipsis.
    pub fn truncate_with_ellipsis(msg: &mut String, max_len: usize) {
        if msg.len() <= max_len {
            return;
        }

        let ellipsis_len = ELLIPSIS.len_utf8();
        let mut end = max_len.saturating_sub(ellipsis_len);
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        msg.truncate(end);
        if ellipsis_len <= max_len {
            msg.push(ELLIPSIS);
        }
        debug_assert!(msg.len() <= max_len);
    }

}
