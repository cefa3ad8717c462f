mod cli;
mod error;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use smartbox_core::{MqttTransport, Orchestrator, RumqttTransport};

use crate::cli::{Cli, LogFormat};
use crate::error::CliError;

/// Crates whose logs `-v` raises; everything else stays at `warn`.
const LOG_TARGETS: &[&str] = &["smartbox2mqtt", "smartbox_core", "smartbox_api", "smartbox_config"];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let directives = LOG_TARGETS
        .iter()
        .fold(String::from("warn"), |acc, target| format!("{acc},{target}={level}"));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().with_current_span(true).init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if cli.print_config_path {
        let path = cli.config.unwrap_or_else(smartbox_config::config_path);
        println!("{}", path.display());
        return Ok(());
    }

    let loaded = smartbox_config::load(cli.config.as_deref())?;
    info!(path = %loaded.source.path.display(), "loaded configuration");
    let mut config = loaded.config;
    if cli.no_realtime {
        config.smartbox.realtime = false;
    }

    let cancel = CancellationToken::new();
    let client = config.smartbox.api_client()?;
    let (transport, inbound) = RumqttTransport::connect(&config.mqtt, &cancel).await?;
    let transport: Arc<dyn MqttTransport> = Arc::new(transport);

    let orchestrator =
        match Orchestrator::start(&config, client, Arc::clone(&transport), inbound, &cancel).await {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    warn!(error = %close_err, "transport close failed");
                }
                cancel.cancel();
                return Err(e.into());
            }
        };

    shutdown_signal().await;
    orchestrator.shutdown().await;
    cancel.cancel();
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}
