use std::path::PathBuf;
use std::sync::Arc;

use ai_track::config::{AppConfig, MigrationConfig};
use ai_track::error::AppError;
use ai_track::gateway;
use ai_track::migration::{
    MigrationJob, MigrationOptions, MigrationReport, EXIT_FATAL, USERS_COLLECTION,
};
use ai_track::telemetry::{self, EventSink, TracingSink};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "migrate-users",
    about = "Move legacy plaintext-password users into the identity provider",
    version
)]
struct Cli {
    /// Service-account key file (overrides GOOGLE_APPLICATION_CREDENTIALS)
    #[arg(long)]
    credentials: Option<PathBuf>,
    /// Documents fetched per listing page
    #[arg(long)]
    page_size: Option<u32>,
    /// Collection holding the user documents
    #[arg(long, default_value = USERS_COLLECTION)]
    collection: String,
    /// Classify every record without creating identities or touching documents
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    match run(Cli::parse()).await {
        Ok(report) => {
            print_summary(&report);
            std::process::exit(report.summary.exit_code());
        }
        Err(err) => {
            eprintln!("fatal error running migration: {err}");
            std::process::exit(EXIT_FATAL);
        }
    }
}

async fn run(cli: Cli) -> Result<MigrationReport, AppError> {
    let mut config = AppConfig::load()?;
    if let Some(credentials) = cli.credentials {
        config.gateway.credentials = Some(credentials);
    }
    if let Some(page_size) = cli.page_size {
        config.migration.page_size = MigrationConfig::validate_page_size(page_size)?;
    }

    telemetry::init(&config.telemetry)?;
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);

    let gateway = gateway::connect(&config.gateway).await?;
    let options = MigrationOptions {
        collection: cli.collection,
        page_size: config.migration.page_size,
        dry_run: cli.dry_run,
    };
    let job = MigrationJob::from_gateway(gateway, events, options)?;

    Ok(job.run().await?)
}

fn print_summary(report: &MigrationReport) {
    println!("Migration complete. Summary:");
    println!("  created: {}", report.summary.created);
    println!("  skipped: {}", report.summary.skipped);
    println!("  failed:  {}", report.summary.failed);
    println!("  eligible: {}", report.eligible);
    for failure in &report.failures {
        println!("  - {} failed at {}: {}", failure.id, failure.stage, failure.reason);
    }
}
