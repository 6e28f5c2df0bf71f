use clap::{Parser, Subcommand};
use colored::*;
use deskrun_cli::commands;
use deskrun_cli::logging::init_logging;
use deskrun_cli::server::{run_server, shutdown_signal};
use deskrun_cli::Config;
use deskrun_sandbox::DaytonaProvider;
use std::process;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "deskrun")]
#[command(about = "Deskrun - remote desktop sandboxes on demand")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control API and VNC gateway
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Delete a provider sandbox directly
    Stop {
        /// Provider sandbox id, as reported in `sandbox_id`
        sandbox_id: String,
    },
    /// Ping a provider sandbox periodically so it is not stopped as idle
    KeepAlive {
        /// Provider sandbox id, as reported in `sandbox_id`
        sandbox_id: String,
        /// Seconds between pings
        #[arg(long, default_value_t = commands::DEFAULT_KEEP_ALIVE_INTERVAL.as_secs(),
              value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    match command {
        Commands::Serve { port } => run_server(config.with_port(port)?).await,
        Commands::Stop { sandbox_id } => {
            let provider = DaytonaProvider::new(config.daytona_config())?;
            commands::stop_sandbox(&provider, &sandbox_id).await?;
            println!("{} Sandbox {} deleted", "✓".green(), sandbox_id);
            Ok(())
        }
        Commands::KeepAlive {
            sandbox_id,
            interval,
        } => {
            let provider = DaytonaProvider::new(config.daytona_config())?;
            println!(
                "Keeping sandbox {} alive, pinging every {}s. Press Ctrl+C to stop.",
                sandbox_id.cyan(),
                interval
            );
            let report = commands::keep_alive(
                &provider,
                &sandbox_id,
                Duration::from_secs(interval),
                shutdown_signal(),
            )
            .await?;
            println!(
                "{} Stopped keep-alive after {} pings ({} failed)",
                "✓".green(),
                report.pings,
                report.failures
            );
            Ok(())
        }
    }
}
