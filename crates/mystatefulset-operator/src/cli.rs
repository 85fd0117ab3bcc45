//! Command line interface of the operator binary.
//!
//! Every argument can also be set through the environment variable clap
//! derives from its name, e.g. `--settle-delay` as `SETTLE_DELAY`.
use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser};
use mystatefulset_telemetry::TelemetryOptions;
use mystatefulset_webhook::{
    WebhookServerOptions,
    constants::{DEFAULT_TLS_CERT_PATH, DEFAULT_TLS_KEY_PATH},
};

use crate::controller::ReconcilerConfig;

pub const DEFAULT_FIELD_MANAGER: &str = "mystatefulset-operator";

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(name = "mystatefulset-operator", author, version, about)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Print the CRD of MyStatefulSet as YAML.
    Crd,

    /// Run the operator.
    Run(RunArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(long_about = "")]
pub struct RunArguments {
    /// Provides a specific namespace to watch (instead of watching all namespaces)
    #[arg(long, env)]
    pub watch_namespace: Option<String>,

    /// How long to wait before looking again at pods which are shutting down.
    #[arg(long, env, value_name = "DURATION", default_value = "3s")]
    pub settle_delay: humantime::Duration,

    /// How long to wait before retrying a failed reconciliation.
    #[arg(long, env, value_name = "DURATION", default_value = "10s")]
    pub error_requeue_delay: humantime::Duration,

    /// Field manager used for all writes to the cluster.
    #[arg(long, env, default_value = DEFAULT_FIELD_MANAGER)]
    pub field_manager: String,

    // Flattened structs go last so the help headings line up
    #[command(flatten)]
    pub webhook: WebhookArguments,

    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}

impl RunArguments {
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            settle_delay: self.settle_delay.into(),
            error_requeue_delay: self.error_requeue_delay.into(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Webhook Options")]
pub struct WebhookArguments {
    /// Serve the defaulting and validating admission webhooks.
    #[arg(long, env)]
    pub webhook_enabled: bool,

    /// Socket address the webhook server binds to.
    #[arg(long, env, value_name = "ADDRESS", default_value = "0.0.0.0:8443")]
    pub webhook_bind_address: SocketAddr,

    /// PEM encoded certificate chain of the webhook server.
    #[arg(long, env, value_name = "FILE", default_value = DEFAULT_TLS_CERT_PATH)]
    pub webhook_tls_cert: PathBuf,

    /// PEM encoded private key of the webhook server.
    #[arg(long, env, value_name = "FILE", default_value = DEFAULT_TLS_KEY_PATH)]
    pub webhook_tls_key: PathBuf,
}

impl WebhookArguments {
    pub fn server_options(&self) -> WebhookServerOptions {
        WebhookServerOptions::builder()
            .bind_address(self.webhook_bind_address.ip(), self.webhook_bind_address.port())
            .tls_certificate_path(self.webhook_tls_cert.clone())
            .tls_private_key_path(self.webhook_tls_key.clone())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::CommandFactory;
    use rstest::rstest;

    use super::*;

    fn parse_run(args: &[&str]) -> RunArguments {
        let opts = Opts::try_parse_from(
            ["mystatefulset-operator", "run"]
                .into_iter()
                .chain(args.iter().copied()),
        )
        .expect("arguments must parse");

        match opts.command {
            Command::Run(run) => run,
            Command::Crd => panic!("expected the run subcommand"),
        }
    }

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[test]
    fn crd_subcommand() {
        let opts = Opts::try_parse_from(["mystatefulset-operator", "crd"]).expect("must parse");
        assert_eq!(opts.command, Command::Crd);
    }

    #[test]
    fn run_defaults() {
        let run = parse_run(&[]);

        assert_eq!(run.watch_namespace, None);
        assert_eq!(run.field_manager, DEFAULT_FIELD_MANAGER);
        assert_eq!(run.reconciler_config(), ReconcilerConfig::default());
        assert!(!run.webhook.webhook_enabled);
        assert_eq!(run.telemetry, TelemetryOptions::default());

        let options = run.webhook.server_options();
        assert_eq!(options.socket_addr, "0.0.0.0:8443".parse().expect("valid address"));
        assert_eq!(options.tls_certificate_path, PathBuf::from(DEFAULT_TLS_CERT_PATH));
    }

    #[rstest]
    #[case("500ms", Duration::from_millis(500))]
    #[case("1m", Duration::from_secs(60))]
    #[case("1m 30s", Duration::from_secs(90))]
    fn settle_delay_is_human_readable(#[case] input: &str, #[case] expected: Duration) {
        let run = parse_run(&["--settle-delay", input]);
        assert_eq!(run.reconciler_config().settle_delay, expected);
    }

    #[test]
    fn invalid_delay_is_rejected() {
        let result =
            Opts::try_parse_from(["mystatefulset-operator", "run", "--settle-delay", "soon"]);

        assert!(result.is_err());
    }

    #[test]
    fn webhook_arguments() {
        let run = parse_run(&[
            "--watch-namespace",
            "apps",
            "--webhook-enabled",
            "--webhook-bind-address",
            "127.0.0.1:9443",
            "--webhook-tls-cert",
            "/certs/tls.crt",
            "--webhook-tls-key",
            "/certs/tls.key",
        ]);

        assert_eq!(run.watch_namespace.as_deref(), Some("apps"));
        assert!(run.webhook.webhook_enabled);

        let options = run.webhook.server_options();
        assert_eq!(options.socket_addr, "127.0.0.1:9443".parse().expect("valid address"));
        assert_eq!(options.tls_private_key_path, PathBuf::from("/certs/tls.key"));
    }
}
