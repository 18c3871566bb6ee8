mod beatgrid;
mod catalog;
mod cli;
mod config;
mod genre;
mod jobs;
mod render;
mod scoring;
mod sequence;
mod tools;
mod transition;
mod types;

use rmcp::ServiceExt;
use rmcp::transport::stdio;

use config::RenderSettings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Stdout carries the MCP transport; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if std::env::args().len() > 1 {
        return cli::main().await;
    }

    let server = tools::MixforgeServer::new(
        Some(catalog::resolve_db_path()),
        RenderSettings::from_env(),
    );
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
