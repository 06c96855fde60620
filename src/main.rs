//! memotier - inspect and clear two-tier memoization caches
//!
//! memotier provides:
//! - Size reports for the volatile (mem) and durable (disk) tiers
//! - Clearing or destroying tiers, optionally by tag
//! - Unified output format (jsonl/json/md/raw)

use anyhow::Result;
use clap::Parser;

mod cli;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    memotier::core::logging::init(cli.verbosity())?;
    cli::run(cli)
}
