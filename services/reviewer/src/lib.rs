mod cli;
mod demo;
mod infra;
mod watch;

use badge_award::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
