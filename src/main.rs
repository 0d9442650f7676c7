use clap::Parser;
use drivegate::cli::Cli;
use drivegate::logging::setup_logging;
use drivegate::server::Server;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let dotenv = dotenvy::dotenv();

    setup_logging();

    match dotenv {
        Err(err) if !err.not_found() => warn!(error = %err, "Failed to load .env file"),
        _ => {}
    }

    let cli = Cli::parse();

    Server::new(cli).run().await.map_err(|err| {
        eprintln!("Server error: {}", err);
        err.into()
    })
}
