//! JSON-RPC 2.0 handling for the MCP stdio transport.

use serde_json::{Map, Value, json};

use crate::client::ApiClient;
use crate::error::{ToolError, rpc_code};
use crate::tools::{self, TOOLS};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer {
    client: ApiClient,
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() },
    })
}

fn text_content(text: String, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

impl McpServer {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Handle one line from stdin. Returns the response to write, if any.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(line) {
            Ok(message) => self.handle(message).await,
            Err(e) => Some(rpc_error(Value::Null, rpc_code::PARSE_ERROR, format!("Parse error: {}", e))),
        }
    }

    /// Notifications (no `id`) never get a response.
    pub async fn handle(&self, message: Value) -> Option<Value> {
        let Some(obj) = message.as_object() else {
            return Some(rpc_error(Value::Null, rpc_code::INVALID_REQUEST, "Request must be an object"));
        };
        let id = obj.get("id").cloned();
        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            return id.map(|id| rpc_error(id, rpc_code::INVALID_REQUEST, "Missing method"));
        };
        let id = id?;
        let params = obj.get("params").cloned().unwrap_or(Value::Null);

        tracing::debug!("rpc {} id={}", method, id);
        let response = match method {
            "initialize" => rpc_result(id, self.initialize()),
            "ping" => rpc_result(id, json!({})),
            "tools/list" => rpc_result(id, Self::list_tools()),
            "tools/call" => self.call_tool(id, &params).await,
            other => rpc_error(id, rpc_code::METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        };
        Some(response)
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": "gateflow-mcp",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "instructions": format!("Manage the GateFlow store at {}", self.client.base_url()),
        })
    }

    fn list_tools() -> Value {
        let tools: Vec<Value> = TOOLS
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, id: Value, params: &Value) -> Value {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return rpc_error(id, rpc_code::INVALID_PARAMS, "Missing tool name");
        };
        let args = match params.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return rpc_error(id, rpc_code::INVALID_PARAMS, "arguments must be an object"),
        };

        match self.run_tool(name, &args).await {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                rpc_result(id, text_content(text, false))
            }
            Err(e) if e.is_protocol_error() => rpc_error(id, rpc_code::INVALID_PARAMS, e.to_string()),
            Err(e) => {
                tracing::warn!("Tool {} failed: {}", name, e);
                rpc_result(id, text_content(e.tool_text(), true))
            }
        }
    }

    async fn run_tool(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let tool = tools::find(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let (path, body) = tool.build_request(args)?;
        self.client.send(tool.verb.method(), &path, body.as_ref()).await
    }
}
