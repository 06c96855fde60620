//! CLI module - Command-line interface definitions and handlers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use memotier::config::{ENV_DURABLE_ROOT, ENV_VOLATILE_ROOT};
use memotier::core::logging::Verbosity;
use memotier::core::render::{OutputFormat, RenderConfig, Renderer};
use memotier::{CacheContext, CacheSettings, TierSelector};

/// memotier - inspect and clear the shared memoization caches.
#[derive(Parser, Debug)]
#[command(name = "memotier")]
#[command(
    author,
    version,
    about,
    long_about = r#"memotier reports on and clears the volatile (mem) and durable (disk)
caches used by memoized functions.

Each command prints a cache report in the selected format (default: jsonl).

Output formats:
- jsonl: one JSON object per tier (best for piping into tools)
- json: a single JSON object
- md: human-friendly Markdown
- raw: the plain-text report

Examples:
    memotier info
    memotier info --tag unit_tests
    memotier clear mem
    memotier clear all --destroy
"#
)]
pub struct Cli {
    /// Output format (jsonl/json/md/raw).
    #[arg(
        long,
        global = true,
        default_value = "jsonl",
        value_name = "FORMAT",
        long_help = "Select the output format for the cache report.\n\n\
Supported values:\n\
- jsonl (default)\n\
- json\n\
- md (markdown)\n\
- raw"
    )]
    pub format: String,

    /// Pretty-print JSON/JSONL output with indentation.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Quiet mode (errors only on stderr).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug diagnostics on stderr).
    #[arg(
        short,
        long,
        global = true,
        long_help = "Enable debug diagnostics on stderr. RUST_LOG, when set, refines the\n\
filter further."
    )]
    pub verbose: bool,

    /// Directory holding the volatile (mem) tier.
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        env = ENV_VOLATILE_ROOT,
        long_help = "Directory holding the volatile (mem) tier.\n\n\
Defaults to /mnt/tmpfs when it exists, otherwise the system temp directory."
    )]
    pub volatile_root: Option<PathBuf>,

    /// Directory holding the durable (disk) tier.
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        env = ENV_DURABLE_ROOT,
        long_help = "Directory holding the durable (disk) tier.\n\n\
Defaults to the current directory."
    )]
    pub durable_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report the location and size of every tier.
    #[command(
        long_about = "Report the location and size of the mem and disk tiers.\n\n\
Tiers that were never written are reported as not created.\n\n\
Examples:\n\
  memotier info\n\
  memotier info --tag unit_tests --format md\n"
    )]
    Info {
        /// Report the tagged tiers instead of the default ones.
        #[arg(long, value_name = "TAG")]
        tag: Option<String>,
    },

    /// Remove cached entries.
    #[command(
        long_about = "Remove every entry from the selected tiers, then report them.\n\n\
Examples:\n\
  memotier clear mem\n\
  memotier clear all --tag unit_tests --destroy\n"
    )]
    Clear {
        /// Tier to clear: mem, disk or all.
        #[arg(value_name = "TIER")]
        tier: String,

        /// Clear the tagged tiers instead of the default ones.
        #[arg(long, value_name = "TAG")]
        tag: Option<String>,

        /// Also remove the tier directories.
        #[arg(long)]
        destroy: bool,
    },
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }

    fn settings(&self) -> Result<CacheSettings> {
        let mut settings = CacheSettings::from_env().context("Invalid cache environment")?;
        if let Some(root) = &self.volatile_root {
            settings.volatile_root = root.clone();
        }
        if let Some(root) = &self.durable_root {
            settings.durable_root = root.clone();
        }
        Ok(settings)
    }
}

/// Run the CLI with parsed arguments
pub fn run(cli: Cli) -> Result<()> {
    let format: OutputFormat = cli.format.parse().unwrap_or_default();
    let renderer = Renderer::with_config(RenderConfig::with_pretty(format, cli.pretty));
    let context = CacheContext::new(cli.settings()?);

    match cli.command {
        Commands::Info { tag } => {
            let report = context
                .cache_report(tag.as_deref())
                .context("Failed to inspect caches")?;
            println!("{}", renderer.render(&report));
        }

        Commands::Clear { tier, tag, destroy } => {
            let selector: TierSelector = tier.parse()?;
            context
                .clear_cache(selector, tag.as_deref(), destroy)
                .with_context(|| format!("Failed to clear '{}' cache", tier))?;
            let report = context
                .cache_report(tag.as_deref())
                .context("Failed to inspect caches")?
                .with_action(if destroy { "destroy" } else { "clear" });
            println!("{}", renderer.render(&report));
        }
    }
    Ok(())
}
