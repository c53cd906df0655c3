//! `foremand`: boot entry point for the Foreman daemon.
//!
//! Boot configuration is CLI flags only; everything protocol-level lives
//! behind the HTTP API.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use foreman_foundation::paths::DataPaths;
use foreman_foundation::storage::Store;
use foreman_gateway::{AppState, serve};
use foreman_runtime::{Engine, run_doctor};

#[derive(Parser)]
#[command(name = "foremand", about = "Foreman agent workflow daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server.
    Serve(ServeArgs),
    /// Run end-to-end diagnostics on a disposable session and print the
    /// JSON report (exit code 1 when any check fails).
    Doctor(StoreArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// SQLite database file path.
    #[arg(long, default_value = "data/foreman.sqlite3")]
    db_path: PathBuf,

    /// Data root directory (default: a `data/` directory next to the DB
    /// file).
    #[arg(long)]
    data_root: Option<PathBuf>,
}

#[derive(Args)]
struct ServeArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Host to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Accepted for parity with development tooling; the daemon has no
    /// auto-reloader.
    #[arg(long)]
    reload: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => {
            if args.reload {
                warn!("--reload is accepted for dev parity but has no effect");
            }
            let engine = build_engine(&args.store).await?;
            serve(AppState::new(engine), &args.host, args.port).await?;
            Ok(())
        }
        Commands::Doctor(args) => {
            let engine = build_engine(&args).await?;
            let report = run_doctor(&engine).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.ok {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn build_engine(args: &StoreArgs) -> anyhow::Result<Engine> {
    let store = Store::open(&args.db_path).await?;
    store.bootstrap().await?;
    let paths = DataPaths::from_db_path(&args.db_path, args.data_root.clone());
    Ok(Engine::new(store, paths))
}
