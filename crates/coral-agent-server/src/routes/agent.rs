use axum::{body::Bytes, response::Json, routing::post, Router};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Serialize, PartialEq)]
pub struct EchoResponse {
    content: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

// The body is parsed by hand so a malformed request still gets an echo
async fn handle_message(body: Bytes) -> Json<EchoResponse> {
    let data: Option<Value> = serde_json::from_slice(&body).ok();
    info!(
        "Received message: {}",
        data.as_ref()
            .map(serde_json::Value::to_string)
            .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned())
    );

    let content = data.as_ref().and_then(|d| d.get("content"));
    Json(EchoResponse {
        content: format!("Echo: {}", render(content)),
        kind: "response",
    })
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "None".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(true)) => "True".to_string(),
        Some(Value::Bool(false)) => "False".to_string(),
        Some(other) => other.to_string(),
    }
}

pub fn routes() -> Router {
    Router::new().route("/agent", post(handle_message))
}
