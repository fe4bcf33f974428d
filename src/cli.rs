use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "walter")]
#[command(version)]
#[command(
    about = "LLM-driven Hyperliquid perpetuals trader fed by market data and news narratives",
    long_about = None
)]
pub struct Cli {
    /// Directory holding default.toml and <WALTER_ENV>.toml
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Build orders without signing or sending them (overrides the config)
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Dry-run can be forced from the command line but never disabled there
    pub fn effective_dry_run(&self, configured: bool) -> bool {
        self.dry_run || configured
    }
}
