use airquality::{
    AirQualityConfig, Collection, CombineMode, DatasetClient, create_example_config, load_config,
};
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use diagnostics::*;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = "airquality.yaml";

/// Hourly ozone and NO2 readings from the EPA historical air quality dataset
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log to stderr (-v info, -vv debug). Overrides AIRQUALITY_LOG.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an example configuration file
    Init {
        #[arg(default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Print the SQL that would be issued for each pollutant
    Sql {
        #[arg(default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Check credentials and project access with a trivial query
    Test {
        #[arg(default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Credential file, overriding the configuration
        #[arg(long)]
        credentials: Option<PathBuf>,
    },
    /// Query every pollutant and combine the results
    Collect {
        #[arg(default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// How per-pollutant tables are combined
        #[arg(long, value_enum)]
        combine: Option<CombineMode>,

        /// Credential file, overriding the configuration
        #[arg(long)]
        credentials: Option<PathBuf>,

        /// Query pollutants concurrently
        #[arg(long)]
        parallel: bool,

        /// Number of combined rows to print
        #[arg(long, default_value_t = 10)]
        preview: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.verbose {
        0 => init_diagnostics(),
        1 => init_with_minimum(emit::Level::Info),
        _ => init_with_minimum(emit::Level::Debug),
    }

    match cli.command {
        Commands::Init { config } => init_config(&config),
        Commands::Sql { config } => print_sql(&config),
        Commands::Test {
            config,
            credentials,
        } => test_access(&config, credentials).await,
        Commands::Collect {
            config,
            combine,
            credentials,
            parallel,
            preview,
        } => {
            let mut config = read_config(&config)?;
            if let Some(mode) = combine {
                config.combine = mode;
            }
            if credentials.is_some() {
                config.credentials = credentials;
            }
            config.parallel |= parallel;
            collect(config, preview).await
        }
    }
}

fn read_config(path: &Path) -> Result<AirQualityConfig> {
    if !path.exists() {
        anyhow::bail!(
            "Configuration file not found: {}\nRun: airquality init {} to create an example configuration file",
            path.display(),
            path.display()
        );
    }
    let display = path.display().to_string();
    debug!("Loading configuration from: {display}", display: display);
    load_config(path).with_context(|| format!("Failed to load configuration from: {display}"))
}

#[allow(clippy::print_stdout)]
fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        println!("Configuration file already exists: {}", path.display());
        println!("Delete it first if you want to create a new one.");
        return Ok(());
    }

    create_example_config(path)
        .with_context(|| format!("Failed to create configuration file: {}", path.display()))?;

    println!("Created example configuration file: {}", path.display());
    println!();
    println!("Edit it to set:");
    println!("  - project: the project billed for the queries");
    println!("  - credentials: a service account key or gcloud credentials file (optional)");
    println!("  - pollutants, years, combine: what to collect and how to merge it");
    println!();
    println!("Then run: airquality collect {}", path.display());
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_sql(path: &Path) -> Result<()> {
    let config = read_config(path)?;
    let template = config.template()?;
    for pollutant in &config.pollutants {
        let bound = template.bind(pollutant)?;
        println!("-- {}", bound.pollutant);
        println!("{}", bound.sql);
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn test_access(path: &Path, credentials: Option<PathBuf>) -> Result<()> {
    let mut config = read_config(path)?;
    if credentials.is_some() {
        config.credentials = credentials;
    }

    println!("Testing BigQuery access for project {}...", config.project);
    let client = airquality::connect(&config).context("Failed to resolve credentials")?;
    client
        .check_access()
        .await
        .context("Access test failed")?;
    println!("Access test completed successfully!");
    Ok(())
}

async fn collect(config: AirQualityConfig, preview: usize) -> Result<()> {
    debug!("Starting collection...");
    let collection = airquality::collect(config)
        .await
        .context("Collection failed")?;

    print_collection(&collection, preview)
}

#[allow(clippy::print_stdout)]
fn print_collection(collection: &Collection, preview: usize) -> Result<()> {
    for report in &collection.reports {
        println!("{:>8}: {} rows", report.pollutant, report.rows);
    }
    println!(
        "combined ({}): {} rows x {} columns",
        collection.mode,
        collection.table.num_rows(),
        collection.table.num_columns()
    );

    if preview > 0 && collection.table.num_rows() > 0 {
        let shown = preview.min(collection.table.num_rows());
        let head = collection.table.slice(0, shown);
        let formatted = arrow_cast::pretty::pretty_format_batches(&[head])
            .context("Failed to format preview")?;
        println!("{formatted}");
    }
    Ok(())
}
