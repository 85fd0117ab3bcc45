//! Reconciliation of `MyStatefulSet` objects.
//!
//! Every pass starts from scratch: it fetches the object, lists the pods it
//! owns and derives what to do from the difference. Nothing is remembered
//! between passes, so duplicated or dropped triggers are harmless.
//!
//! A pass on a live object
//!
//! 1. creates the claims and the pod of every missing ordinal, lowest first,
//! 2. waits (by requeueing) while any owned pod is terminating,
//! 3. removes the surplus pod with the highest ordinal, if any, and otherwise
//! 4. replaces the lowest-ordinal pod that diverges from the template.
//!
//! Objects which are being deleted are handed to [`teardown`] instead.
use std::{sync::Arc, time::Duration};

use const_format::concatcp;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::{
    Api, ResourceExt,
    core::DynamicObject,
    runtime::{
        Controller,
        controller::Action,
        events::{Recorder, Reporter},
        reflector::ObjectRef,
        watcher,
    },
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    crd::{GROUP, MyStatefulSet},
    labels::OWNER_LABEL,
    logging::controller::{ReconcilerError, report_controller_reconciled},
    store::{self, KubeStore, ObjectStore},
};

pub mod factory;
pub mod observed;
pub mod resolver;
pub mod scale_down;
pub mod teardown;
pub mod update;

pub const CONTROLLER_NAME: &str = "mystatefulset";
pub const FULL_CONTROLLER_NAME: &str = concatcp!(CONTROLLER_NAME, ".", GROUP);

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_ERROR_REQUEUE_DELAY: Duration = Duration::from_secs(10);

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to fetch {mystatefulset}"))]
    ResolveDesiredState {
        source: store::Error,
        mystatefulset: ObjectRef<MyStatefulSet>,
    },

    #[snafu(display("{mystatefulset} has no spec.replicas set, refusing to guess"))]
    MissingReplicas {
        mystatefulset: ObjectRef<MyStatefulSet>,
    },

    #[snafu(display("{mystatefulset} requests a negative replica count ({replicas})"))]
    NegativeReplicas {
        mystatefulset: ObjectRef<MyStatefulSet>,
        replicas: i32,
    },

    #[snafu(display("failed to prepare owned objects"))]
    PrepareOwnedObjects { source: factory::Error },

    #[snafu(display("failed to list pods owned by {mystatefulset}"))]
    CollectObservedState {
        source: store::Error,
        mystatefulset: ObjectRef<MyStatefulSet>,
    },

    #[snafu(display("failed to create missing pod with ordinal {ordinal}"))]
    CreateMissingInstance {
        source: factory::Error,
        ordinal: u32,
    },

    #[snafu(display("failed to scale down"))]
    ScaleDown { source: scale_down::Error },

    #[snafu(display("failed to replace outdated pod"))]
    ApplyUpdate { source: update::Error },

    #[snafu(display("failed to tear down owned objects"))]
    Teardown { source: teardown::Error },
}

impl Error {
    /// Errors caused by the object itself. Retrying them is pointless until
    /// the object changes.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MissingReplicas { .. } | Self::NegativeReplicas { .. }
        )
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::ObjectHasNoNamespace
            | Self::ResolveDesiredState { .. }
            | Self::MissingReplicas { .. }
            | Self::NegativeReplicas { .. }
            | Self::CollectObservedState { .. } => None,
            Self::PrepareOwnedObjects { source } | Self::CreateMissingInstance { source, .. } => {
                source.secondary_object()
            }
            Self::ScaleDown { source } => source.secondary_object(),
            Self::ApplyUpdate { source } => source.secondary_object(),
            Self::Teardown { source } => source.secondary_object(),
        }
    }
}

/// Identifies the `MyStatefulSet` a pass works on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn object_ref(&self) -> ObjectRef<MyStatefulSet> {
        ObjectRef::new(&self.name).within(&self.namespace)
    }
}

/// Tunables of the reconciler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// How long to wait before looking again at a pod which is shutting down.
    pub settle_delay: Duration,

    /// How long to wait before retrying a failed pass.
    pub error_requeue_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            error_requeue_delay: DEFAULT_ERROR_REQUEUE_DELAY,
        }
    }
}

pub struct Context<S> {
    pub store: S,
    pub config: ReconcilerConfig,
}

impl<S> Context<S> {
    pub fn new(store: S, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }
}

/// Runs one reconciliation pass for the object identified by `key`.
#[tracing::instrument(
    skip(ctx),
    fields(k8s.namespace.name = %key.namespace, mystatefulset.name = %key.name)
)]
pub async fn reconcile<S: ObjectStore>(key: &ObjectKey, ctx: &Context<S>) -> Result<Action> {
    let store = &ctx.store;

    let Some(mss) = resolver::resolve(store, key)
        .await
        .with_context(|_| ResolveDesiredStateSnafu {
            mystatefulset: key.object_ref(),
        })?
    else {
        tracing::debug!("object no longer exists, nothing to do");
        return Ok(Action::await_change());
    };

    if mss.is_being_deleted() {
        tracing::info!("object is being deleted, tearing down owned objects");
        return match teardown::teardown(store, &mss)
            .await
            .context(TeardownSnafu)?
        {
            teardown::TeardownOutcome::Complete => Ok(Action::await_change()),
            teardown::TeardownOutcome::Pending(_) => {
                Ok(Action::requeue(ctx.config.settle_delay))
            }
        };
    }

    let replicas = desired_replicas(&mss, key)?;
    let factory = factory::OrdinalResourceFactory::new(&mss).context(PrepareOwnedObjectsSnafu)?;
    let observed = observed::collect(store, &key.namespace, &key.name, replicas)
        .await
        .with_context(|_| CollectObservedStateSnafu {
            mystatefulset: key.object_ref(),
        })?;

    for ordinal in observed.missing_ordinals(replicas) {
        factory
            .ensure_storage_claims(store, ordinal)
            .await
            .context(CreateMissingInstanceSnafu { ordinal })?;
        factory
            .ensure_instance(store, ordinal)
            .await
            .context(CreateMissingInstanceSnafu { ordinal })?;
    }

    let terminating = observed.terminating();
    if !terminating.is_empty() {
        tracing::info!(?terminating, "waiting for pods to shut down");
        return Ok(Action::requeue(ctx.config.settle_delay));
    }

    if let Some(removed) = scale_down::scale_down_one(store, &key.namespace, &observed)
        .await
        .context(ScaleDownSnafu)?
    {
        tracing::debug!(k8s.pod.name = %removed, "scaled down by one pod");
        return Ok(Action::requeue(ctx.config.settle_delay));
    }

    match update::apply_one_update(store, &factory, &observed, &mss.spec.template)
        .await
        .context(ApplyUpdateSnafu)?
    {
        update::UpdateOutcome::UpToDate => Ok(Action::await_change()),
        update::UpdateOutcome::Replaced(_) | update::UpdateOutcome::Terminating(_) => {
            Ok(Action::requeue(ctx.config.settle_delay))
        }
    }
}

fn desired_replicas(mss: &MyStatefulSet, key: &ObjectKey) -> Result<u32> {
    let replicas = mss.spec.replicas.with_context(|| MissingReplicasSnafu {
        mystatefulset: key.object_ref(),
    })?;

    u32::try_from(replicas).map_err(|_| {
        NegativeReplicasSnafu {
            mystatefulset: key.object_ref(),
            replicas,
        }
        .build()
    })
}

/// Decides when a failed pass is retried.
///
/// Configuration errors are not retried, the next change of the object
/// triggers a new pass anyway.
pub fn error_policy<S>(_obj: Arc<MyStatefulSet>, error: &Error, ctx: Arc<Context<S>>) -> Action {
    if error.is_configuration_error() {
        Action::await_change()
    } else {
        Action::requeue(ctx.config.error_requeue_delay)
    }
}

async fn reconcile_object(
    mss: Arc<MyStatefulSet>,
    ctx: Arc<Context<KubeStore>>,
) -> Result<Action> {
    let namespace = mss.namespace().context(ObjectHasNoNamespaceSnafu)?;
    reconcile(&ObjectKey::new(namespace, mss.name_any()), ctx.as_ref()).await
}

/// Watches `MyStatefulSet` objects (and the pods and claims they own) and
/// reconciles them until `shutdown` completes.
pub async fn run(
    store: KubeStore,
    config: ReconcilerConfig,
    watch_namespace: Option<&str>,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) {
    let client = store.as_kube_client();
    let (mss_api, pod_api, pvc_api) = match watch_namespace {
        Some(namespace) => (
            Api::<MyStatefulSet>::namespaced(client.clone(), namespace),
            Api::<Pod>::namespaced(client.clone(), namespace),
            Api::<PersistentVolumeClaim>::namespaced(client.clone(), namespace),
        ),
        None => (
            Api::<MyStatefulSet>::all(client.clone()),
            Api::<Pod>::all(client.clone()),
            Api::<PersistentVolumeClaim>::all(client.clone()),
        ),
    };
    let owned_config = watcher::Config::default().labels(OWNER_LABEL);

    let event_recorder = Arc::new(Recorder::new(
        client,
        Reporter {
            controller: FULL_CONTROLLER_NAME.to_owned(),
            instance: None,
        },
    ));

    tracing::info!(
        controller.name = FULL_CONTROLLER_NAME,
        namespace = watch_namespace.unwrap_or("<all>"),
        "starting controller"
    );

    Controller::new(mss_api, watcher::Config::default())
        .owns(pod_api, owned_config.clone())
        .owns(pvc_api, owned_config)
        .graceful_shutdown_on(shutdown)
        .run(
            reconcile_object,
            error_policy,
            Arc::new(Context::new(store, config)),
        )
        // We can let the reporting happen in the background
        .for_each_concurrent(
            16, // concurrency limit
            |result| {
                // The event_recorder needs to be shared across all invocations, so that
                // events are correctly aggregated
                let event_recorder = event_recorder.clone();
                async move {
                    report_controller_reconciled(&event_recorder, FULL_CONTROLLER_NAME, &result)
                        .await;
                }
            },
        )
        .await;
}
