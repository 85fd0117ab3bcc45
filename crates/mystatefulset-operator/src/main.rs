use clap::Parser;
use futures::{FutureExt as _, future};
use mystatefulset_operator::{
    admission,
    cli::{Command, Opts, RunArguments},
    controller,
    crd::{self, CustomResourceExt as _, MyStatefulSet},
    signal::{self, ShutdownWatcher},
    store::KubeStore,
};
use mystatefulset_telemetry::Tracing;
use mystatefulset_webhook::{WebhookError, WebhookServer};
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "mystatefulset-operator";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to print CRD"))]
    PrintCrd { source: crd::Error },

    #[snafu(display("failed to initialize tracing"))]
    InitTracing {
        source: mystatefulset_telemetry::Error,
    },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to watch for shutdown signals"))]
    WatchSignals { source: signal::SignalError },

    #[snafu(display("failed to create webhook server"))]
    CreateWebhookServer { source: WebhookError },

    #[snafu(display("failed to run webhook server"))]
    RunWebhookServer { source: WebhookError },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    match opts.command {
        Command::Crd => MyStatefulSet::print_yaml_schema().context(PrintCrdSnafu),
        Command::Run(run) => run_operator(run).await,
    }
}

async fn run_operator(run: RunArguments) -> Result<(), Error> {
    let _tracing_guard = Tracing::pre_configured(APP_NAME, run.telemetry.clone())
        .init()
        .context(InitTracingSnafu)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        watch_namespace = run.watch_namespace.as_deref().unwrap_or("<all>"),
        "starting {APP_NAME}"
    );

    let client = kube::Client::try_default()
        .await
        .context(CreateClientSnafu)?;
    let store = KubeStore::new(client, Some(run.field_manager.clone()));
    let shutdown = ShutdownWatcher::terminate_or_interrupt().context(WatchSignalsSnafu)?;

    let controller = controller::run(
        store,
        run.reconciler_config(),
        run.watch_namespace.as_deref(),
        shutdown.handle(),
    );

    if !run.webhook.webhook_enabled {
        controller.await;
        return Ok(());
    }

    let webhook_server = WebhookServer::new(admission::webhooks(), run.webhook.server_options())
        .context(CreateWebhookServerSnafu)?;
    let webhook = webhook_server.run(shutdown.handle());

    // A failing webhook server ends the process, a shutdown signal ends both
    future::try_join(controller.map(Ok), webhook)
        .await
        .context(RunWebhookServerSnafu)?;

    Ok(())
}
