use std::process::ExitCode;

use gateflow_mcp::{ApiClient, McpServer};
use tracing_subscriber::EnvFilter;

const DEFAULT_API_URL: &str = "http://localhost:3000";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gateflow_mcp=info")))
        .init();

    let Ok(api_key) = std::env::var("GATEFLOW_API_KEY") else {
        tracing::error!("GATEFLOW_API_KEY must be set");
        return ExitCode::FAILURE;
    };
    let base_url = std::env::var("GATEFLOW_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

    tracing::info!("gateflow-mcp talking to {}", base_url);
    let server = McpServer::new(ApiClient::new(&base_url, &api_key));

    match gateflow_mcp::run(&server, tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("stdio transport failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
