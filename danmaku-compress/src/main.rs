use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use danmaku_compress::config::AppConfig;
use danmaku_compress::logging::init_logging;
use danmaku_compress::panic_hook;
use danmaku_compress::pipeline::Submission;
use danmaku_compress::services::ServiceContainer;
use danmaku_compress::services::container::DEFAULT_SHUTDOWN_TIMEOUT;
use mimalloc::MiMalloc;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Serve the HTTP API and run the scheduler until Ctrl-C (default)
    Serve {
        /// Seconds to wait for an in-flight run at shutdown
        #[arg(long, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT.as_secs())]
        shutdown_timeout: u64,
    },
    /// Run the pipeline once and print the result as JSON
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let (logging_config, _log_guard) =
        init_logging(&config.log_dir).context("Failed to initialize logging")?;
    panic_hook::install(&config.log_dir);

    info!("danmaku-compress v{} starting", env!("CARGO_PKG_VERSION"));

    let container = ServiceContainer::new(config)
        .context("Failed to build services")?
        .with_logging_config(logging_config);

    let command = args.command.unwrap_or(Command::Serve {
        shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
    });
    match command {
        Command::Serve { shutdown_timeout } => {
            serve(container, Duration::from_secs(shutdown_timeout)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run => run_once(&container).await,
    }
}

async fn serve(container: ServiceContainer, shutdown_timeout: Duration) -> anyhow::Result<()> {
    let scheduler = container.start_background_services();
    let server = container.api_server();
    let mut server_task = tokio::spawn(async move { server.run().await });

    // The server only returns early on failure (e.g. the port is taken).
    let early_exit = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Ctrl-C received, shutting down");
            None
        }
        joined = &mut server_task => Some(joined),
    };

    if !container.shutdown_with_timeout(shutdown_timeout).await {
        error!("Abandoning the in-flight pipeline run");
    }
    if let Some(scheduler) = scheduler {
        let _ = scheduler.await;
    }

    let joined = match early_exit {
        Some(joined) => joined,
        None => server_task.await,
    };
    joined.context("API server task panicked")?.context("API server failed")?;
    Ok(())
}

async fn run_once(container: &ServiceContainer) -> anyhow::Result<ExitCode> {
    let handle = match container.guard.submit() {
        Submission::Accepted(handle) => handle,
        Submission::Busy => anyhow::bail!("a run is already in progress"),
    };

    let result = handle.wait().await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_the_default() {
        let args = Args::parse_from(["danmaku-compress"]);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_parse_subcommands() {
        let args = Args::parse_from(["danmaku-compress", "run"]);
        assert_eq!(args.command, Some(Command::Run));

        let args = Args::parse_from(["danmaku-compress", "serve", "--shutdown-timeout", "5"]);
        assert_eq!(
            args.command,
            Some(Command::Serve {
                shutdown_timeout: 5
            })
        );
    }
}
