use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bweplot")]
#[command(about = "Render per-run performance charts from RTP simulation logs")]
#[command(version)]
struct Command {
    /// Input directory containing .jsonl event logs and .stderr trace logs
    #[arg(short, long, default_value = "logs")]
    input: PathBuf,

    /// Output directory for generated plot files (png)
    #[arg(short, long, default_value = "logs")]
    output: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let opts = Command::parse();

    let default_filter = if opts.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    bweplot::runs::plot_all(&opts.input, &opts.output)
}
