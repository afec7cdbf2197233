use clap::Parser;
use wayfarer::client::cli_client::{run, CliArgs};
use wayfarer::utils::logger::WayfarerLogger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // load .env first so LOG_LEVEL and the urls can live there during development
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "warn".to_string());
    WayfarerLogger::init(&level);
    run(args).await
}
