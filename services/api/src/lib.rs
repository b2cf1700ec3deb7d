mod cli;
mod infra;
mod routes;
mod server;

use ai_track::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
