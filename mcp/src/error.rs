//! Error types for the MCP bridge

use thiserror::Error;

/// JSON-RPC 2.0 error codes used by the server
pub mod rpc_code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
}

/// What went wrong while running a tool
#[derive(Debug, Error)]
pub enum ToolError {
    /// Unknown tool name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    /// Missing or mistyped argument
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    /// The API could not be reached
    #[error("Network error: {0}")]
    Network(String),
    /// The API answered with a non-2xx status. `body` is passed through untouched.
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
}

impl ToolError {
    /// Errors that come from the caller rather than the API map to
    /// JSON-RPC errors; everything else becomes an `isError` tool result.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::UnknownTool(_) | Self::InvalidArguments(_))
    }

    /// Text shown to the model. API errors are returned raw.
    pub fn tool_text(&self) -> String {
        match self {
            Self::Api { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_errors_pass_through_raw() {
        let body = r#"{"error":{"code":"FORBIDDEN","message":"Admin access required"}}"#;
        let err = ToolError::Api {
            status: 403,
            body: body.to_string(),
        };
        assert_eq!(err.tool_text(), body);
        assert!(!err.is_protocol_error());
        assert!(ToolError::UnknownTool("x".into()).is_protocol_error());
    }
}
