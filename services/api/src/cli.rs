use std::path::PathBuf;

use crate::server;
use ai_track::config::AppConfig;
use ai_track::error::AppError;
use ai_track::scoring::WeightModel;
use clap::{Args, Parser, Subcommand};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(
    name = "AI-Track API",
    about = "Serve the AI-Track transit backend or score features offline",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Score one feature vector with the weight model and print the result
    Score(ScoreArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Service-account key file; without one registrations are not persisted
    #[arg(long)]
    pub(crate) credentials: Option<PathBuf>,
    /// Weight model JSON file
    #[arg(long)]
    pub(crate) weights: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct ScoreArgs {
    /// Weight model JSON file
    #[arg(long)]
    weights: Option<PathBuf>,
    /// Feature values, comma or space separated
    #[arg(
        required = true,
        num_args = 1..,
        value_delimiter = ',',
        allow_negative_numbers = true
    )]
    features: Vec<f64>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Score(args) => run_score(args),
    }
}

fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let path = match args.weights {
        Some(path) => path,
        None => AppConfig::load()?.model.weights_path,
    };
    let model = WeightModel::load(&path)?;
    let score = model.score(&args.features);

    println!("{}", json!({ "success": true, "score": score }));
    Ok(())
}
