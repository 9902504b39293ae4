//! Unified error model for the session client.
//! Every backend failure, storage failure and local validation failure is classified
//! into one `AppError` so callers can decide between inline recovery and the shared
//! notification path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field name -> messages, as returned in a Laravel `errors` map.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    #[error("{code}: {message}")]
    InvalidCredentials { code: String, message: String },
    #[error("{code}: {message}")]
    SessionExpired { code: String, message: String },
    #[error("{code}: {message}")]
    Forbidden { code: String, message: String },
    #[error("{code}: {message}")]
    NetworkUnavailable { code: String, message: String },
    #[error("{code}: {message}")]
    ServerFault { code: String, message: String },
    #[error("{code}: {message}")]
    ValidationFailed {
        code: String,
        message: String,
        #[serde(default)]
        fields: FieldErrors,
    },
    #[error("{code}: {message}")]
    NotFound { code: String, message: String },
    #[error("{code}: {message}")]
    Conflict { code: String, message: String },
    #[error("{code}: {message}")]
    Decode { code: String, message: String },
    #[error("{code}: {message}")]
    Storage { code: String, message: String },
    #[error("{code}: {message}")]
    Config { code: String, message: String },
}

/// How a failed call is classified; login-style calls read 401 as bad credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Inline,
    Authenticated,
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::InvalidCredentials { code, .. }
            | AppError::SessionExpired { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NetworkUnavailable { code, .. }
            | AppError::ServerFault { code, .. }
            | AppError::ValidationFailed { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Decode { code, .. }
            | AppError::Storage { code, .. }
            | AppError::Config { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::InvalidCredentials { message, .. }
            | AppError::SessionExpired { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::NetworkUnavailable { message, .. }
            | AppError::ServerFault { message, .. }
            | AppError::ValidationFailed { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Decode { message, .. }
            | AppError::Storage { message, .. }
            | AppError::Config { message, .. } => message.as_str(),
        }
    }

    pub fn invalid_credentials<S: Into<String>>(code: S, msg: S) -> Self { AppError::InvalidCredentials { code: code.into(), message: msg.into() } }
    pub fn session_expired<S: Into<String>>(code: S, msg: S) -> Self { AppError::SessionExpired { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn network<S: Into<String>>(code: S, msg: S) -> Self { AppError::NetworkUnavailable { code: code.into(), message: msg.into() } }
    pub fn server<S: Into<String>>(code: S, msg: S) -> Self { AppError::ServerFault { code: code.into(), message: msg.into() } }
    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { AppError::ValidationFailed { code: code.into(), message: msg.into(), fields: FieldErrors::new() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn decode<S: Into<String>>(code: S, msg: S) -> Self { AppError::Decode { code: code.into(), message: msg.into() } }
    pub fn storage<S: Into<String>>(code: S, msg: S) -> Self { AppError::Storage { code: code.into(), message: msg.into() } }
    pub fn config<S: Into<String>>(code: S, msg: S) -> Self { AppError::Config { code: code.into(), message: msg.into() } }

    /// Validation failure for a single form field.
    pub fn field(field: &str, msg: &str) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![msg.to_string()]);
        AppError::ValidationFailed { code: "validation_failed".into(), message: msg.to_string(), fields }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::InvalidCredentials { .. } => 401,
            AppError::SessionExpired { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::NetworkUnavailable { .. } => 503,
            AppError::ServerFault { .. } => 500,
            AppError::ValidationFailed { .. } => 422,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Decode { .. } => 502,
            AppError::Storage { .. } => 500,
            AppError::Config { .. } => 500,
        }
    }

    /// Classify a non-success HTTP response. `body` is the decoded JSON body when there was one.
    pub fn from_status(status: u16, body: Option<&serde_json::Value>, mode: CallMode) -> Self {
        let message = body
            .and_then(|b| b.get("message").or_else(|| b.get("error")))
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("HTTP {}", status));
        match status {
            401 if mode == CallMode::Inline => AppError::invalid_credentials("invalid_credentials".to_string(), message),
            401 => AppError::session_expired("session_expired".to_string(), message),
            403 => AppError::forbidden("forbidden".to_string(), message),
            404 => AppError::not_found("not_found".to_string(), message),
            409 => AppError::conflict("conflict".to_string(), message),
            500..=599 => AppError::server(format!("http_{}", status), message),
            _ => AppError::ValidationFailed {
                code: if status == 422 { "validation_failed".into() } else { format!("http_{}", status) },
                message,
                fields: body.map(field_errors).unwrap_or_default(),
            },
        }
    }

    /// True for failures that mean the bearer token no longer identifies anyone.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AppError::SessionExpired { .. } | AppError::Forbidden { .. })
    }

    /// True for failures the caller recovers from inline without touching the session.
    pub fn is_inline(&self) -> bool {
        matches!(self, AppError::InvalidCredentials { .. } | AppError::ValidationFailed { .. })
    }
}

fn field_errors(body: &serde_json::Value) -> FieldErrors {
    let mut out = FieldErrors::new();
    let Some(map) = body.get("errors").and_then(|e| e.as_object()) else { return out; };
    for (k, v) in map {
        let msgs = match v {
            serde_json::Value::Array(arr) => arr.iter().filter_map(|m| m.as_str().map(|s| s.to_string())).collect(),
            serde_json::Value::String(s) => vec![s.clone()],
            _ => Vec::new(),
        };
        out.insert(k.clone(), msgs);
    }
    out
}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Config { code: "unexpected".into(), message: err.to_string() }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AppError::decode("decode_error".to_string(), err.to_string());
        }
        if let Some(status) = err.status() {
            return AppError::from_status(status.as_u16(), None, CallMode::Authenticated);
        }
        AppError::network("network_unavailable".to_string(), err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::decode("decode_error".to_string(), err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::storage("storage_io".to_string(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::invalid_credentials("bad", "no").http_status(), 401);
        assert_eq!(AppError::session_expired("exp", "gone").http_status(), 401);
        assert_eq!(AppError::forbidden("fb", "no").http_status(), 403);
        assert_eq!(AppError::network("net", "down").http_status(), 503);
        assert_eq!(AppError::server("srv", "boom").http_status(), 500);
        assert_eq!(AppError::validation("val", "bad").http_status(), 422);
        assert_eq!(AppError::not_found("nf", "missing").http_status(), 404);
        assert_eq!(AppError::conflict("c", "dup").http_status(), 409);
    }

    #[test]
    fn unauthorized_depends_on_call_mode() {
        let inline = AppError::from_status(401, None, CallMode::Inline);
        assert!(matches!(inline, AppError::InvalidCredentials { .. }));
        assert!(inline.is_inline());
        let auth = AppError::from_status(401, None, CallMode::Authenticated);
        assert!(matches!(auth, AppError::SessionExpired { .. }));
        assert!(auth.is_auth_failure());
        assert_eq!(auth.message(), "HTTP 401");
    }

    #[test]
    fn from_status_reads_laravel_body() {
        let body = json!({"message": "The given data was invalid.", "errors": {"email": ["taken"], "name": "short"}});
        let err = AppError::from_status(422, Some(&body), CallMode::Inline);
        match err {
            AppError::ValidationFailed { code, message, fields } => {
                assert_eq!(code, "validation_failed");
                assert_eq!(message, "The given data was invalid.");
                assert_eq!(fields.get("email"), Some(&vec!["taken".to_string()]));
                assert_eq!(fields.get("name"), Some(&vec!["short".to_string()]));
            }
            other => panic!("unexpected {other:?}"),
        }
        let err = AppError::from_status(503, Some(&json!({"error": "maintenance"})), CallMode::Authenticated);
        assert_eq!(err.code_str(), "http_503");
        assert_eq!(err.message(), "maintenance");
        assert!(matches!(AppError::from_status(418, None, CallMode::Authenticated), AppError::ValidationFailed { .. }));
    }

    #[test]
    fn serializes_tagged() {
        let v = serde_json::to_value(AppError::forbidden("forbidden", "nope")).unwrap();
        assert_eq!(v["type"], "forbidden");
        assert_eq!(AppError::field("email", "required").to_string(), "validation_failed: required");
    }
}
