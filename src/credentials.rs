use crate::config::FileConfig;
use crate::error::{AppError, AppResult};

pub const DEFAULT_CHAT_URL: &str = "https://chat-ai.academiccloud.de/api/chat/completions";
pub const DEFAULT_MODELS_URL: &str = "https://chat-ai.academiccloud.de/models";

/// Resolved upstream addressing and session auth for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub cookie: String,
    pub chat_url: String,
    pub models_url: String,
}

impl CredentialBundle {
    /// Splits a bearer token of the form `cookie|chatURL|modelsURL` where the
    /// trailing parts are optional. A one-part token gets both default URLs; a
    /// two-part token derives the models URL from the chat URL.
    pub fn from_token(token: &str) -> AppResult<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::bad_request(
                "empty_credential",
                "credential token is empty",
            ));
        }
        let mut parts = token.splitn(3, '|');
        let cookie = parts.next().unwrap_or_default().trim();
        if cookie.is_empty() {
            return Err(AppError::bad_request(
                "empty_credential",
                "credential token has no cookie part",
            ));
        }
        let chat = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let models = parts.next().map(str::trim).filter(|s| !s.is_empty());

        let chat_url = chat.unwrap_or(DEFAULT_CHAT_URL).to_string();
        let models_url = match (chat, models) {
            (_, Some(models)) => models.to_string(),
            (Some(chat), None) => derive_models_url(chat),
            (None, None) => DEFAULT_MODELS_URL.to_string(),
        };

        Ok(Self {
            cookie: cookie.to_string(),
            chat_url,
            models_url,
        })
    }

    pub fn from_file_config(config: &FileConfig) -> Self {
        Self {
            cookie: config.cookie.clone().unwrap_or_default(),
            chat_url: config.api_url.clone(),
            models_url: derive_models_url(&config.api_url),
        }
    }
}

/// Resolves the per-request bundle. An Authorization header wins over the
/// static config; with neither the request cannot be forwarded.
pub fn resolve(
    auth_header: Option<&str>,
    file_config: Option<&FileConfig>,
) -> AppResult<CredentialBundle> {
    if let Some(header) = auth_header {
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::unauthorized(
                "invalid_authorization",
                "authorization header must use the Bearer scheme",
            )
        })?;
        return CredentialBundle::from_token(token);
    }
    if let Some(config) = file_config {
        return Ok(CredentialBundle::from_file_config(config));
    }
    Err(AppError::unauthorized(
        "missing_credentials",
        "no Authorization header and no static upstream configured",
    ))
}

fn derive_models_url(chat_url: &str) -> String {
    let chat_url = chat_url.trim_end_matches('/');
    if let Some(base) = chat_url.strip_suffix("/api/chat/completions") {
        format!("{base}/models")
    } else if let Some(base) = chat_url.strip_suffix("/chat/completions") {
        format!("{base}/models")
    } else {
        DEFAULT_MODELS_URL.to_string()
    }
}
