mod checkpoint;
mod config;
mod data_dir;
mod notify;
mod registry;
mod runner;
mod sampler;
mod serve;
mod signals;
mod status;
mod watchdog;

use clap::Parser;
use std::path::PathBuf;
use tokio::io::AsyncBufRead;

/// Watch per-interface throughput statistics and react to sustained drops:
/// notify, restart the process, suspend or stop the watchdog.
#[derive(Parser, Debug)]
#[command(name = "interface-watchdog", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "interface-watchdog.toml")]
    config: PathBuf,

    /// Data directory for the checkpoint and status files (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Read samples from this file or FIFO instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Status server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Do not start the status server
    #[arg(long)]
    no_serve: bool,

    /// Resolve the configuration, print the watchdogs, don't run
    #[arg(long)]
    dry_run: bool,

    /// Print the last written status and exit
    #[arg(long)]
    status: bool,

    /// Extra logging (state transitions, checkpoint writes)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(port) = cli.port {
        config.serve.port = port;
    }
    if cli.no_serve {
        config.serve.enabled = false;
    }

    let data_dir = data_dir::DataDir::new(&config.storage.data_dir);

    if cli.status {
        let status_file = status::StatusFile::new(data_dir.status());
        match status_file.read() {
            Ok(value) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
                );
                return;
            }
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }

    if cli.dry_run {
        dry_run(&config, &data_dir);
        return;
    }

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match &cli.input {
        Some(path) => match tokio::fs::File::open(path).await {
            Ok(file) => Box::new(tokio::io::BufReader::new(file)),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to open sample input");
                std::process::exit(1);
            }
        },
        None => Box::new(tokio::io::BufReader::new(tokio::io::stdin())),
    };

    match runner::run(&config, input, signals::shutdown_signal()).await {
        Ok(runner::RunOutcome::Disabled) => {}
        Ok(runner::RunOutcome::Shutdown { checkpoint_saved }) => {
            if !checkpoint_saved {
                std::process::exit(1);
            }
        }
        Ok(runner::RunOutcome::Restart(request)) => {
            tracing::info!(
                watchdog = %request.watchdog,
                exit_code = config.restart.exit_code,
                "exiting for restart"
            );
            std::process::exit(config.restart.exit_code);
        }
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    }
}

/// Print the watchdogs the configuration resolves to, merged with the
/// current checkpoint, without touching any files.
fn dry_run(config: &config::AppConfig, data_dir: &data_dir::DataDir) {
    let checkpoint = checkpoint::CheckpointStore::new(data_dir.checkpoint()).load();
    let registry = registry::Registry::build(&config.watchdogs, &config.plugin.id, &checkpoint);

    println!("interface-watchdog v{}", env!("CARGO_PKG_VERSION"));
    println!("Status: {}", registry.status());
    for wd in registry.watchdogs() {
        println!(
            "  {} on {}: threshold {}, start {}, stop {}, action {}, path {}, restart {}, problems since file creation {}",
            wd.name,
            wd.interface,
            wd.threshold,
            wd.start_action_threshold,
            wd.stop_action_threshold,
            wd.action,
            wd.notification_path,
            wd.restart_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
            wd.problems_since_file_creation,
        );
    }
    if registry.rejected() > 0 {
        println!("  dropped {} invalid entries (see warnings above)", registry.rejected());
    }
    println!("Dry run mode, not running.");
}
