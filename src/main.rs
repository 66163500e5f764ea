use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use survey_satisfaction::config::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_IN_FLIGHT};
use survey_satisfaction::db::{self, PgStore};
use survey_satisfaction::{AggregationConfig, AggregationOutcome, Aggregator, RowFilter};

#[derive(Parser)]
#[command(name = "survey-satisfaction")]
#[command(about = "Satisfaction scores by faculty and program from student surveys", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, default_value_t = 5, global = true)]
    max_connections: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ScanArgs {
    /// Rows fetched per page
    #[arg(long, env = "SURVEY_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// Pages processed concurrently
    #[arg(long, env = "SURVEY_MAX_IN_FLIGHT", default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,
}

impl ScanArgs {
    fn config(&self) -> anyhow::Result<AggregationConfig> {
        let config = AggregationConfig::default()
            .with_chunk_size(self.chunk_size)
            .with_max_in_flight(self.max_in_flight);
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo survey version
    Seed,
    /// Compute satisfaction percentages for a dataset version
    Aggregate {
        #[arg(long)]
        version: Uuid,
        #[arg(long, requires = "filter_value")]
        filter_column: Option<String>,
        #[arg(long, requires = "filter_column")]
        filter_value: Option<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Recompute the cached result from stored tallies
    Refresh {
        #[arg(long)]
        version: Uuid,
    },
    /// List the values a column can be filtered on
    FilterValues {
        #[arg(long)]
        version: Uuid,
        #[arg(long)]
        column: String,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .init();
}

fn print_summary(outcome: &AggregationOutcome) {
    let result = &outcome.result;
    if let Some(filter) = &outcome.applied_filter {
        println!("Filtered by {filter}.");
    } else if let Some(filter) = &outcome.requested_filter {
        println!("Filter {filter} matches no rows; showing all responses.");
    }
    if outcome.from_cache {
        println!("(served from cache)");
    }

    if result.is_empty() {
        println!("No survey responses recorded for this version yet.");
        return;
    }

    println!("Global satisfaction {:.2}%", result.global);
    for faculty in &result.faculties {
        println!("- {} {:.2}%", faculty.name, faculty.overall);
        for program in &faculty.programs {
            println!("    - {} {:.2}%", program.name, program.overall);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    debug!(max_connections = cli.max_connections, "connected to Postgres");

    let store = Arc::new(PgStore::new(pool.clone()));

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let version = db::seed(&pool).await?;
            println!("Seed data inserted as version {version}.");
        }
        Commands::Aggregate {
            version,
            filter_column,
            filter_value,
            json,
            scan,
        } => {
            let aggregator = Aggregator::with_store(store, scan.config()?);
            let filter = filter_column
                .zip(filter_value)
                .map(|(column, value)| RowFilter::new(column, value));
            let outcome = aggregator
                .run_aggregation(version, filter)
                .await
                .with_context(|| format!("aggregation failed for version {version}"))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_summary(&outcome);
            }
        }
        Commands::Refresh { version } => {
            let aggregator = Aggregator::with_store(store, AggregationConfig::default());
            let result = aggregator
                .refresh_from_cache(version)
                .await
                .with_context(|| format!("could not refresh version {version}"))?;
            println!(
                "Refreshed {} faculties, global satisfaction {:.2}%.",
                result.faculties.len(),
                result.global
            );
        }
        Commands::FilterValues { version, column } => {
            let aggregator = Aggregator::with_store(store, AggregationConfig::default());
            let values = aggregator.filter_values(version, &column).await?;
            if values.is_empty() {
                println!("No values recorded for {column}.");
            }
            for value in values {
                println!("- {value}");
            }
        }
    }

    Ok(())
}
