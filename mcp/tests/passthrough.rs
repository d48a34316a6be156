use axum::{
    Json, Router,
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use gateflow_mcp::{ApiClient, McpServer};
use serde_json::{Value, json};

const FORBIDDEN_BODY: &str = r#"{"error":{"code":"FORBIDDEN","message":"Admin access required"}}"#;

async fn get_payment(headers: HeaderMap, Path(id): Path<String>) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({ "id": id, "auth": auth }))
}

async fn refund(Path(_id): Path<String>, Json(body): Json<Value>) -> impl IntoResponse {
    (StatusCode::CREATED, Json(json!({ "echo": body })))
}

async fn forbidden() -> impl IntoResponse {
    (StatusCode::FORBIDDEN, [("content-type", "application/json")], FORBIDDEN_BODY)
}

async fn spawn_api() -> String {
    let app = Router::new()
        .route("/api/v1/payments/{id}", get(get_payment))
        .route("/api/v1/payments/{id}/refund", post(refund))
        .route("/api/v1/users", get(forbidden));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn call(server: &McpServer, name: &str, arguments: Value) -> Value {
    server
        .handle(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments },
        }))
        .await
        .unwrap()
}

fn text(resp: &Value) -> &str {
    resp["result"]["content"][0]["text"].as_str().unwrap()
}

#[tokio::test]
async fn test_tool_call_sends_bearer_key() {
    let base = spawn_api().await;
    let server = McpServer::new(ApiClient::new(&base, "gf_live_abc"));

    let resp = call(&server, "get_payment", json!({"id": "tx_1"})).await;
    assert_eq!(resp["result"]["isError"], false);
    let body: Value = serde_json::from_str(text(&resp)).unwrap();
    assert_eq!(body["id"], "tx_1");
    assert_eq!(body["auth"], "Bearer gf_live_abc");
}

#[tokio::test]
async fn test_post_tool_sends_json_body() {
    let base = spawn_api().await;
    let server = McpServer::new(ApiClient::new(&base, "gf_live_abc"));

    let resp = call(&server, "refund_payment", json!({"id": "tx_1", "amount_cents": 250})).await;
    let body: Value = serde_json::from_str(text(&resp)).unwrap();
    assert_eq!(body["echo"], json!({"amount_cents": 250}));
}

#[tokio::test]
async fn test_api_error_is_passed_through_raw() {
    let base = spawn_api().await;
    let server = McpServer::new(ApiClient::new(&base, "gf_live_abc"));

    let resp = call(&server, "list_users", json!({})).await;
    assert_eq!(resp["result"]["isError"], true);
    assert_eq!(text(&resp), FORBIDDEN_BODY);
}

#[tokio::test]
async fn test_stdio_loop_skips_notifications() {
    let server = McpServer::new(ApiClient::new("http://127.0.0.1:9", "k"));
    let input = concat!(
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#,
        "\n",
    );
    let mut output = Vec::new();
    gateflow_mcp::run(&server, input.as_bytes(), &mut output).await.unwrap();

    let text = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);
    let resp: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(resp["id"], 7);
}
