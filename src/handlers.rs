use crate::app::AppState;
use crate::credentials::{self, CredentialBundle};
use crate::error::{AppError, AppResult};
use crate::upstream::{self, UpstreamErrorKind};
use axum::Json;
use axum::extract::State;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;

const DEFAULT_MODEL: &str = "deepseek-r1";
const MISSING_KEY_PLACEHOLDER: &str = "Missing Key";

// Error strings are part of the wire contract and intentionally match what the
// upstream's existing clients expect.
const TIMEOUT_ERROR: &str = "请求超时";
const UPSTREAM_ERROR_PREFIX: &str = "API错误";

pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    let target = state
        .file_config()
        .map(|config| config.api_url.clone())
        .unwrap_or_else(|| "(per-request)".to_string());
    Json(json!({
        "status": "running",
        "service": "chatrelay",
        "target": target
    }))
}

/// `GET /v1/models`. Never fails: any upstream problem, and the absence of any
/// credential at all, falls back to the single default model record.
pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let bundle = match resolve_bundle(&state, &headers) {
        Ok(bundle) => bundle,
        Err(err) => {
            tracing::debug!(code = %err.code, "no credential for model listing, using fallback");
            return Json(fallback_model_list()).into_response();
        }
    };
    match upstream::fetch_models(&state.http, &bundle).await {
        Ok(value) => match map_model_records(&value) {
            Some(data) => Json(json!({ "object": "list", "data": data })).into_response(),
            None => {
                tracing::warn!("upstream model list had unexpected shape, using fallback");
                Json(fallback_model_list()).into_response()
            }
        },
        Err(err) => {
            tracing::warn!(status = ?err.status, "model listing failed: {}", err.message);
            Json(fallback_model_list()).into_response()
        }
    }
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let bundle = resolve_bundle(&state, &headers)?;
    let body: Value = serde_json::from_slice(&body)
        .map_err(|err| AppError::bad_request("invalid_json", err.to_string()))?;

    let api_key = body
        .get("api_key")
        .and_then(|v| v.as_str())
        .unwrap_or(MISSING_KEY_PLACEHOLDER)
        .to_string();
    let payload = apply_payload_defaults(&body);
    let streaming = payload
        .get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    tracing::info!(
        model = payload.get("model").and_then(|v| v.as_str()).unwrap_or(""),
        messages = payload
            .get("messages")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0),
        streaming,
        "chat completion request"
    );

    let timeout = state.runtime.chat_timeout;
    if streaming {
        let (tx, rx) = mpsc::channel::<Event>(64);
        let client = state.http.clone();
        tokio::spawn(async move {
            relay_stream(client, bundle, api_key, payload, timeout, tx).await;
        });
        let stream =
            tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>);
        let mut resp = Sse::new(stream).into_response();
        let headers = resp.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        );
        return Ok(resp);
    }

    let resp = upstream::send_chat(&state.http, &bundle, &api_key, &payload, timeout)
        .await
        .map_err(|err| {
            AppError::new(StatusCode::BAD_GATEWAY, "upstream_unreachable", err.message)
        })?;
    let status = resp.status();
    let value: Value = resp.json().await.map_err(|err| {
        AppError::new(
            StatusCode::BAD_GATEWAY,
            "upstream_invalid_json",
            err.to_string(),
        )
    })?;
    Ok((status, Json(value)).into_response())
}

/// Pumps the upstream SSE body into the caller's channel, one frame per
/// upstream line. Every failure past this point is encoded as stream content;
/// the outer response is already committed as 200. A closed channel means the
/// caller went away, which drops the upstream response and cancels the read.
async fn relay_stream(
    client: reqwest::Client,
    bundle: CredentialBundle,
    api_key: String,
    payload: Value,
    timeout: std::time::Duration,
    tx: mpsc::Sender<Event>,
) {
    let resp = match upstream::send_chat(&client, &bundle, &api_key, &payload, timeout).await {
        Ok(resp) => resp,
        Err(err) => {
            if err.kind == UpstreamErrorKind::Timeout {
                tracing::error!("upstream request timed out");
                let _ = tx.send(error_event(TIMEOUT_ERROR)).await;
            } else {
                tracing::error!("upstream request failed: {}", err.message);
                let _ = tx.send(error_event(&err.message)).await;
            }
            return;
        }
    };

    let status = resp.status();
    if status != StatusCode::OK {
        let text = resp.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %text, "upstream returned error status");
        let _ = tx
            .send(error_event(&format!(
                "{UPSTREAM_ERROR_PREFIX}: {}",
                status.as_u16()
            )))
            .await;
        return;
    }

    let mut body = resp.bytes_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                if err.is_timeout() {
                    tracing::error!("upstream stream timed out");
                    let _ = tx.send(error_event(TIMEOUT_ERROR)).await;
                } else {
                    tracing::error!("upstream stream failed: {}", err);
                    let _ = tx.send(error_event(&err.to_string())).await;
                }
                return;
            }
        };
        buf.extend_from_slice(&chunk);
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line = buf.split_to(pos + 1);
            if !forward_line(&tx, &line[..line.len() - 1]).await {
                return;
            }
        }
    }
    // A final line without a trailing newline still counts.
    if !buf.is_empty() {
        let _ = forward_line(&tx, &buf).await;
    }
}

/// One upstream line becomes exactly one SSE frame. Lines already carrying the
/// `data: ` prefix pass through unchanged (the prefix is re-applied by the
/// event encoder); anything else gets the prefix added. Blank lines are the
/// upstream's own frame separators and are dropped.
async fn forward_line(tx: &mpsc::Sender<Event>, raw: &[u8]) -> bool {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return true;
    }
    let payload = line.strip_prefix("data: ").unwrap_or(line);
    tx.send(Event::default().data(payload)).await.is_ok()
}

fn error_event(message: &str) -> Event {
    Event::default().data(json!({ "error": message }).to_string())
}

fn resolve_bundle(state: &AppState, headers: &HeaderMap) -> AppResult<CredentialBundle> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    credentials::resolve(auth_header, state.file_config())
}

/// Applies the fixed upstream defaults unconditionally; caller-omitted fields
/// are silently populated. Unknown caller fields are not forwarded.
fn apply_payload_defaults(body: &Value) -> Value {
    json!({
        "model": body.get("model").cloned().unwrap_or_else(|| json!(DEFAULT_MODEL)),
        "messages": body.get("messages").cloned().unwrap_or_else(|| json!([])),
        "temperature": body.get("temperature").cloned().unwrap_or_else(|| json!(0.5)),
        "top_p": body.get("top_p").cloned().unwrap_or_else(|| json!(0.5)),
        "stream": body.get("stream").cloned().unwrap_or_else(|| json!(true)),
        "stream_options": body
            .get("stream_options")
            .cloned()
            .unwrap_or_else(|| json!({ "include_usage": true })),
    })
}

fn fallback_model_list() -> Value {
    json!({
        "object": "list",
        "data": [{
            "id": DEFAULT_MODEL,
            "object": "model",
            "created": 1677610602,
            "owned_by": "deepseek"
        }]
    })
}

fn map_model_records(value: &Value) -> Option<Vec<Value>> {
    let records = value
        .get("data")
        .and_then(|v| v.as_array())
        .or_else(|| value.as_array())?;
    Some(
        records
            .iter()
            .map(|record| {
                json!({
                    "id": record.get("id").cloned().unwrap_or(Value::Null),
                    "object": "model",
                    "created": record.get("created").cloned().unwrap_or_else(|| json!(0)),
                    "owned_by": record
                        .get("owned_by")
                        .cloned()
                        .unwrap_or_else(|| json!("unknown")),
                })
            })
            .collect(),
    )
}
