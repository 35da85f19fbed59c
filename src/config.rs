use crate::error::{AppError, AppResult};
use std::path::Path;

/// Static upstream settings loaded from a `key=value` config file.
///
/// The file is optional: when it is absent the proxy only serves requests that
/// carry their own credential bundle in the Authorization header.
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub api_url: String,
    pub cookie: Option<String>,
    pub port: Option<u16>,
}

pub fn load(path: &Path) -> AppResult<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|err| {
        AppError::bad_request(
            "config_read_failed",
            format!("{}: {}", path.display(), err),
        )
    })?;
    parse(&contents).map(Some)
}

/// Parses `key=value` lines. Blank lines and `#` comments are skipped, the
/// first `=` splits, both sides are trimmed. `API_URL` is required.
fn parse(contents: &str) -> AppResult<FileConfig> {
    let mut api_url: Option<String> = None;
    let mut cookie: Option<String> = None;
    let mut port: Option<u16> = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "API_URL" => api_url = Some(value.to_string()),
            "COOKIE" => cookie = Some(value.to_string()),
            "PORT" => {
                port = Some(value.parse::<u16>().map_err(|err| {
                    AppError::bad_request("config_invalid_port", err.to_string())
                })?);
            }
            _ => {}
        }
    }

    let api_url = api_url.filter(|v| !v.is_empty()).ok_or_else(|| {
        AppError::bad_request("config_missing_api_url", "config file must define API_URL")
    })?;

    Ok(FileConfig {
        api_url,
        cookie: cookie.filter(|v| !v.is_empty()),
        port,
    })
}
