//! Standalone executable hosting the tool dispatcher over stdio (§4.8,
//! §6). Grounded on `llmspell-repl/src/bin/kernel.rs`'s `clap::Parser`
//! args struct + verbosity-to-`EnvFilter` logging setup, adapted from a
//! TCP-bound kernel to a stdio byte stream since the spec's transport
//! is "out of scope... treat as a byte-stream tool dispatcher" (§1) and
//! stdio is the natural default for a process an external assistant
//! spawns and talks to over its own stdin/stdout.

use clap::Parser;
use hippocore_core::config::EngineConfig;
use hippocore_server::{EngineHandle, Result, ToolDispatcher};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Hippocore retrieval engine - tool dispatcher over a stdio byte stream.
#[derive(Parser, Debug)]
#[command(name = "hippocore-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding persisted indices and traces (§6 persisted state layout).
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Optional declarative configuration document (§6 configuration table).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbosity level (can be used multiple times).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn setup_logging(verbosity: u8) {
    let filter_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

async fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut builder = config::Config::builder().add_source(config::Config::try_from(&EngineConfig::default())?);
    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::from(path.as_path()));
    }
    builder = builder.add_source(config::Environment::with_prefix("HIPPOCORE").separator("__"));
    let mut engine_config: EngineConfig = builder.build()?.try_deserialize()?;
    engine_config.data_dir = args.data_dir.clone();
    Ok(engine_config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let engine_config = load_config(&args).await?;
    tracing::info!(data_dir = %engine_config.data_dir.display(), "starting hippocore-server");

    let engine = EngineHandle::open(engine_config).await?;
    let dispatcher = ToolDispatcher::new(engine);

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let result: Result<()> = hippocore_server::serve(&dispatcher, stdin, stdout).await;

    dispatcher.engine().shutdown().await?;
    result.map_err(anyhow::Error::from)
}
