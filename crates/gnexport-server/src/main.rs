use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use gnexport_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use gnexport_server::{ServerBuilder, build_state, observability, run_schedules};

#[derive(Parser)]
#[command(name = "gnexport")]
#[command(about = "Export service for GeoNature database views")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "GNEXPORT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve,
    /// Regenerate stale scheduled export files once, then exit
    RunSchedules,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    observability::init_tracing();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(2);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let cfg = load_config(Some(&cli.config)).map_err(|e| anyhow!("Configuration error: {e}"))?;
    observability::apply_logging_level(&cfg.logging.level);
    tracing::info!(path = %cli.config, backend = ?cfg.storage.backend, "Configuration loaded");

    match cli.command {
        Commands::Serve => {
            let server = ServerBuilder::new()
                .with_config(cfg)
                .build()
                .await
                .context("Server initialization failed")?;
            server.run().await
        }
        Commands::RunSchedules => {
            let state = build_state(cfg).await?;
            let report = run_schedules(&state)
                .await
                .map_err(|e| anyhow!("schedule run failed: {}", e.detail()))?;
            if report.failed > 0 {
                tracing::warn!(failed = report.failed, "some scheduled exports failed");
            }
            Ok(())
        }
    }
}
