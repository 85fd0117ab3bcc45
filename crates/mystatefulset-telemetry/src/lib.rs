//! Initialises the `tracing` subscribers used by the MyStatefulSet operator
//! and its admission webhook: console output, rolling file output and
//! OpenTelemetry OTLP export for logs and traces.
//!
//! ```no_run
//! use mystatefulset_telemetry::{Error, TelemetryOptions, Tracing};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let _tracing_guard = Tracing::pre_configured("test", TelemetryOptions::default()).init()?;
//!
//!     tracing::info!("log a message");
//!     Ok(())
//! }
//! ```
//!
//! The guard returned by [`Tracing::init`] must be held for as long as
//! telemetry should be emitted. Dropping it shuts down the OTLP providers.

use std::path::PathBuf;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{ExporterBuildError, LogExporter, SpanExporter};
use opentelemetry_sdk::{
    Resource, logs::SdkLoggerProvider, propagation::TraceContextPropagator,
    trace::SdkTracerProvider,
};
use snafu::{ResultExt as _, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, layer::SubscriberExt};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors which can be encountered when initialising [`Tracing`].
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to install opentelemetry trace exporter"))]
    InstallOtelTraceExporter { source: ExporterBuildError },

    #[snafu(display("unable to install opentelemetry log exporter"))]
    InstallOtelLogExporter { source: ExporterBuildError },

    #[snafu(display("failed to initialize rolling file appender"))]
    InitRollingFileAppender { source: InitError },

    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// The environment variable and default level of a single subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelSettings {
    pub environment_variable: &'static str,
    pub default_level: LevelFilter,
}

impl LevelSettings {
    fn env_filter(&self) -> EnvFilter {
        env_filter_builder(self.environment_variable, self.default_level)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLogSettings {
    pub level: LevelSettings,
    pub directory: PathBuf,
    pub rotation_period: RotationPeriod,
}

/// A configured (but possibly not yet initialised) set of subscribers.
pub struct Tracing {
    service_name: &'static str,
    console_log: Option<LevelSettings>,
    file_log: Option<FileLogSettings>,
    otlp_log: Option<LevelSettings>,
    otlp_trace: Option<LevelSettings>,

    logger_provider: Option<SdkLoggerProvider>,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Tracing {
    /// The environment variable used to set the console log level filter.
    pub const CONSOLE_LOG_LEVEL: &str = "CONSOLE_LOG_LEVEL";
    /// The environment variable used to set the rolling file log level filter.
    pub const FILE_LOG_LEVEL: &str = "FILE_LOG_LEVEL";
    /// The suffix of rolled log files.
    pub const FILE_LOG_SUFFIX: &str = "tracing-rs.json";
    /// The environment variable used to set the OTEL log level filter.
    pub const OTEL_LOG_EXPORTER_LEVEL: &str = "OTEL_LOG_EXPORTER_LEVEL";
    /// The environment variable used to set the OTEL trace level filter.
    pub const OTEL_TRACE_EXPORTER_LEVEL: &str = "OTEL_TRACE_EXPORTER_LEVEL";

    /// Creates a [`Tracing`] instance from CLI/env [`TelemetryOptions`].
    ///
    /// Every enabled subscriber defaults to the INFO level, which can be
    /// overridden with the level environment variables listed as associated
    /// constants on this type.
    pub fn pre_configured(service_name: &'static str, options: TelemetryOptions) -> Self {
        let TelemetryOptions {
            console_log_disabled,
            file_log_directory,
            file_log_rotation_period,
            otel_trace_exporter_enabled,
            otel_log_exporter_enabled,
        } = options;

        let info = |environment_variable| LevelSettings {
            environment_variable,
            default_level: LevelFilter::INFO,
        };

        Self {
            service_name,
            console_log: (!console_log_disabled).then(|| info(Self::CONSOLE_LOG_LEVEL)),
            file_log: file_log_directory.map(|directory| FileLogSettings {
                level: info(Self::FILE_LOG_LEVEL),
                directory,
                rotation_period: file_log_rotation_period.unwrap_or_default(),
            }),
            otlp_log: otel_log_exporter_enabled.then(|| info(Self::OTEL_LOG_EXPORTER_LEVEL)),
            otlp_trace: otel_trace_exporter_enabled.then(|| info(Self::OTEL_TRACE_EXPORTER_LEVEL)),
            logger_provider: None,
            tracer_provider: None,
        }
    }

    /// Initialize the configured subscribers, returning a guard that shuts
    /// them down when dropped.
    ///
    /// Do not bind the guard to `_`, as that drops it immediately.
    pub fn init(mut self) -> Result<Self> {
        let mut layers: Vec<Box<dyn Layer<Registry> + Sync + Send>> = Vec::new();

        if let Some(console_log) = &self.console_log {
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_filter(console_log.env_filter())
                    .boxed(),
            );
        }

        if let Some(file_log) = &self.file_log {
            let file_appender = RollingFileAppender::builder()
                .rotation(file_log.rotation_period.clone().into())
                .filename_prefix(self.service_name.to_string())
                .filename_suffix(Self::FILE_LOG_SUFFIX)
                .max_log_files(6)
                .build(&file_log.directory)
                .context(InitRollingFileAppenderSnafu)?;

            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(file_appender)
                    .with_filter(file_log.level.env_filter())
                    .boxed(),
            );
        }

        if let Some(otlp_log) = &self.otlp_log {
            let env_filter = otlp_log
                .env_filter()
                // The OTLP exporter itself logs through h2, which would feed back into the exporter
                .add_directive(h2_off());

            let log_exporter = LogExporter::builder()
                .with_tonic()
                .build()
                .context(InstallOtelLogExporterSnafu)?;

            let logger_provider = SdkLoggerProvider::builder()
                .with_batch_exporter(log_exporter)
                .with_resource(
                    Resource::builder()
                        .with_service_name(self.service_name)
                        .build(),
                )
                .build();

            layers.push(
                OpenTelemetryTracingBridge::new(&logger_provider)
                    .with_filter(env_filter)
                    .boxed(),
            );
            self.logger_provider = Some(logger_provider);
        }

        if let Some(otlp_trace) = &self.otlp_trace {
            let env_filter = otlp_trace.env_filter().add_directive(h2_off());

            let trace_exporter = SpanExporter::builder()
                .with_tonic()
                .build()
                .context(InstallOtelTraceExporterSnafu)?;

            let tracer_provider = SdkTracerProvider::builder()
                .with_batch_exporter(trace_exporter)
                .with_resource(
                    Resource::builder()
                        .with_service_name(self.service_name)
                        .build(),
                )
                .build();

            let tracer = tracer_provider.tracer(self.service_name);

            layers.push(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer)
                    .with_filter(env_filter)
                    .boxed(),
            );
            self.tracer_provider = Some(tracer_provider);

            opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        }

        if !layers.is_empty() {
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
                .context(SetGlobalDefaultSubscriberSnafu)?;
        }

        // Returning self keeps the providers alive until the guard is dropped
        Ok(self)
    }
}

impl Drop for Tracing {
    fn drop(&mut self) {
        tracing::debug!(
            opentelemetry.tracing.enabled = self.otlp_trace.is_some(),
            opentelemetry.logger.enabled = self.otlp_log.is_some(),
            "shutting down opentelemetry OTLP providers"
        );

        if let Some(tracer_provider) = &self.tracer_provider
            && let Err(error) = tracer_provider.shutdown()
        {
            tracing::error!(%error, "unable to shutdown TracerProvider");
        }

        if let Some(logger_provider) = &self.logger_provider
            && let Err(error) = logger_provider.shutdown()
        {
            tracing::error!(%error, "unable to shutdown LoggerProvider");
        }
    }
}

fn env_filter_builder(env_var: &str, default_directive: impl Into<Directive>) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(env_var)
        .with_default_directive(default_directive.into())
        .from_env_lossy()
}

fn h2_off() -> Directive {
    "h2=off".parse().expect("static directive must be valid")
}

/// Options which can be passed to [`Tracing::pre_configured()`].
///
/// With the `clap` feature enabled, these can be flattened into an operator's
/// CLI arguments.
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[cfg_attr(feature = "clap", command(next_help_heading = "Telemetry Options"))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TelemetryOptions {
    /// Disable console logs.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub console_log_disabled: bool,

    /// Enable logging to files located in the specified DIRECTORY.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "DIRECTORY", group = "file_log")
    )]
    pub file_log_directory: Option<PathBuf>,

    /// Time PERIOD after which log files are rolled over.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "PERIOD", requires = "file_log")
    )]
    pub file_log_rotation_period: Option<RotationPeriod>,

    /// Enable exporting OTEL traces via OTLP.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub otel_trace_exporter_enabled: bool,

    /// Enable exporting OTEL logs via OTLP.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub otel_log_exporter_enabled: bool,
}

/// Supported periods when the log file is rolled over.
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "PascalCase")]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    Daily,

    #[default]
    Never,
}

impl From<RotationPeriod> for Rotation {
    fn from(value: RotationPeriod) -> Self {
        match value {
            RotationPeriod::Minutely => Self::MINUTELY,
            RotationPeriod::Hourly => Self::HOURLY,
            RotationPeriod::Daily => Self::DAILY,
            RotationPeriod::Never => Self::NEVER,
        }
    }
}
