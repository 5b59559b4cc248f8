use anyhow::Result;
use clap::Parser;
use oastrix::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();
    Cli::parse().run().await?;
    Ok(())
}

fn tracing_init() {
    let level = std::env::var("OASTRIX_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("oastrix={level}")));

    let format = std::env::var("OASTRIX_LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    if format.eq_ignore_ascii_case("console") {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    }
}
