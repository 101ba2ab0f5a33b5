//! Command-line entry point for building and querying location translations.

use std::io::Write as _;
use std::path::{
    Path,
    PathBuf,
};

use anyhow::{
    Context as _,
    bail,
};
use clap::{
    Parser,
    Subcommand,
};
use locations_zh::LookupCoordinator;
use locations_zh::build::build_data_dir;
use locations_zh::config::ConfigManager;
use locations_zh::logging::init_logging;
use locations_zh::types::LocationPath;

#[derive(Parser, Debug)]
#[command(name = "locations-zh", version, about = "Chinese names for countries, provinces and cities")]
struct Cli {
    /// Project root holding `.locations-zh.json`
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Log debug events
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the data directory from a location CSV
    Build {
        /// Headerless CSV with country, province and city in columns 4 to 6
        #[arg(long)]
        input: PathBuf,
        /// Output directory (defaults to `dataDir` from the configuration)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Discard translations already present in the output directory
        #[arg(long)]
        fresh: bool,
    },
    /// List the known countries
    Countries,
    /// Print a country's record, or the translated name of a province or city
    Lookup {
        country: String,
        province: Option<String>,
        city: Option<String>,
        /// Skip the persistent cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Load countries into the cache (defaults to `preload` from the configuration)
    Preload { countries: Vec<String> },
    /// Manage the persistent cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Remove every cached record
    Clear,
    /// Delete the cache database and start over
    Purge,
    /// Print the cache version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    let mut config = ConfigManager::new();
    config.load_settings(&cli.root).context("failed to load configuration")?;

    match cli.command {
        Command::Build { input, out, fresh } => {
            let out = out.unwrap_or_else(|| config.root().join(&config.get_settings().data_dir));
            let stats = build_data_dir(&input, &out, !fresh)?;
            writeln!(std::io::stdout(), "{stats}")?;
        }
        Command::Countries => {
            let lookup = open(&config).await?;
            let mut stdout = std::io::stdout().lock();
            for country in lookup.get_all_countries() {
                writeln!(stdout, "{country}")?;
            }
        }
        Command::Lookup { country, province, city, no_cache } => {
            let lookup = open(&config).await?;
            if no_cache {
                lookup.set_caching_enabled(false);
            }
            let path = LocationPath { country, province, city };
            let result = print_lookup(&lookup, &path).await;
            lookup.shutdown().await;
            result?;
        }
        Command::Preload { countries } => {
            let lookup = open(&config).await?;
            let countries =
                if countries.is_empty() { config.get_settings().preload.clone() } else { countries };
            let report = lookup.preload_countries(&countries).await;
            lookup.shutdown().await;

            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "loaded: {}", report.succeeded.join(", "))?;
            if !report.failed.is_empty() {
                writeln!(stdout, "failed: {}", report.failed.join(", "))?;
            }
        }
        Command::Cache { action } => {
            let lookup = open(&config).await?;
            let message = match action {
                CacheAction::Clear => outcome(lookup.clear_translation_cache().await, "cleared"),
                CacheAction::Purge => outcome(lookup.clear_all_cache().await, "purged"),
                CacheAction::Version => lookup.cache_version_info().to_string(),
            };
            lookup.shutdown().await;
            writeln!(std::io::stdout(), "{message}")?;
        }
    }

    Ok(())
}

async fn open(config: &ConfigManager) -> anyhow::Result<LookupCoordinator> {
    let root: &Path = config.root();
    LookupCoordinator::from_settings(config.get_settings(), root)
        .await
        .context("failed to open the data directory")
}

async fn print_lookup(lookup: &LookupCoordinator, path: &LocationPath) -> anyhow::Result<()> {
    if path.province.is_none() {
        let record = lookup.get_country_data(&path.country).await?;
        let json = serde_json::to_string_pretty(&serde_json::to_value(&*record)?)?;
        writeln!(std::io::stdout(), "{json}")?;
        return Ok(());
    }

    match lookup.translate(path).await? {
        Some(name) => writeln!(std::io::stdout(), "{name}")?,
        None => bail!("'{path}' is not in the data set"),
    }
    Ok(())
}

fn outcome(done: bool, verb: &str) -> String {
    if done { format!("cache {verb}") } else { "cache unavailable".to_string() }
}
