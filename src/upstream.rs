use crate::credentials::CredentialBundle;
use axum::http::StatusCode;
use reqwest::header;
use serde_json::Value;
use std::time::Duration;

/// Default total time budget for one upstream chat call, covering connect,
/// first byte and the whole body for both the streaming and non-streaming
/// paths.
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(300);

const MODELS_TIMEOUT: Duration = Duration::from_secs(30);

const ORIGIN: &str = "https://chat-ai.academiccloud.de";
const REFERER: &str = "https://chat-ai.academiccloud.de/";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Network,
    Timeout,
    Http,
}

#[derive(Debug, Clone)]
pub struct UpstreamCallError {
    pub kind: UpstreamErrorKind,
    pub status: Option<StatusCode>,
    pub message: String,
}

impl UpstreamCallError {
    pub fn new(kind: UpstreamErrorKind, status: Option<StatusCode>, message: String) -> Self {
        Self {
            kind,
            status,
            message,
        }
    }
}

fn classify_transport_error(err: &reqwest::Error) -> UpstreamErrorKind {
    if err.is_timeout() {
        UpstreamErrorKind::Timeout
    } else {
        UpstreamErrorKind::Network
    }
}

/// Sends the chat payload upstream. The response status is not inspected here:
/// the streaming relay turns a non-200 into stream content and the non-stream
/// path passes it through.
pub async fn send_chat(
    client: &reqwest::Client,
    bundle: &CredentialBundle,
    api_key: &str,
    payload: &Value,
    timeout: Duration,
) -> Result<reqwest::Response, UpstreamCallError> {
    let req = client
        .post(&bundle.chat_url)
        .timeout(timeout)
        .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
        .json(payload);
    browser_headers(req, bundle)
        .send()
        .await
        .map_err(|err| {
            UpstreamCallError::new(classify_transport_error(&err), None, err.to_string())
        })
}

/// Fetches the upstream model list. Non-200 statuses are reported as errors so
/// the caller can substitute the fallback list.
pub async fn fetch_models(
    client: &reqwest::Client,
    bundle: &CredentialBundle,
) -> Result<Value, UpstreamCallError> {
    let req = client.get(&bundle.models_url).timeout(MODELS_TIMEOUT);
    let resp = browser_headers(req, bundle).send().await.map_err(|err| {
        UpstreamCallError::new(classify_transport_error(&err), None, err.to_string())
    })?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(UpstreamCallError::new(
            UpstreamErrorKind::Http,
            Some(status),
            format!("upstream status {}: {}", status, text),
        ));
    }
    resp.json::<Value>().await.map_err(|err| {
        UpstreamCallError::new(UpstreamErrorKind::Http, Some(status), err.to_string())
    })
}

fn browser_headers(
    req: reqwest::RequestBuilder,
    bundle: &CredentialBundle,
) -> reqwest::RequestBuilder {
    req.header(header::ACCEPT, "application/json")
        .header(header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::COOKIE, bundle.cookie.as_str())
        .header(header::ORIGIN, ORIGIN)
        .header(header::REFERER, REFERER)
        .header(header::USER_AGENT, USER_AGENT)
}
