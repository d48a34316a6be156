//! Model Context Protocol bridge for the GateFlow management API.
//!
//! Reads JSON-RPC requests line by line from stdin and answers on stdout.
//! Every tool is a thin wrapper over one `/api/v1` endpoint.

pub mod client;
pub mod error;
pub mod server;
pub mod tools;

pub use client::ApiClient;
pub use error::{Result, ToolError};
pub use server::McpServer;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Serve requests from `input` until it closes.
pub async fn run<R, W>(server: &McpServer, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = server.handle_line(&line).await {
            let mut out = response.to_string();
            out.push('\n');
            output.write_all(out.as_bytes()).await?;
            output.flush().await?;
        }
    }
    Ok(())
}
