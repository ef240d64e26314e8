use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use warden_agent::{
    GatewayError, config_files::ConfigError, control::ControlError, runner::RunError,
};

use crate::request_meta::RequestMeta;

const MAX_MESSAGE_BYTES: usize = 32 * 1024;

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    pub fn new(
        meta: &RequestMeta,
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code,
            message: truncate_utf8(&message.into(), MAX_MESSAGE_BYTES),
            request_id: meta.request_id.clone(),
        }
    }

    pub fn from_gateway(meta: &RequestMeta, err: GatewayError) -> Self {
        let (status, code) = classify(&err);
        if status.is_server_error() {
            tracing::warn!(code, error = %err, "request failed");
        } else {
            tracing::debug!(code, error = %err, "request rejected");
        }
        Self::new(meta, status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

pub fn classify(err: &GatewayError) -> (StatusCode, &'static str) {
    match err {
        GatewayError::UnknownProfile(_) => (StatusCode::NOT_FOUND, "unknown_profile"),
        GatewayError::ReadOnly => (StatusCode::CONFLICT, "read_only"),
        GatewayError::Control(ControlError::EmptyCommand)
        | GatewayError::Control(ControlError::InvalidArgument(_)) => {
            (StatusCode::BAD_REQUEST, "invalid_argument")
        }
        GatewayError::Control(ControlError::Run(e)) => classify_run(e, "command_failed"),
        GatewayError::Config(ConfigError::NotAllowed(_)) => (StatusCode::FORBIDDEN, "not_allowed"),
        GatewayError::Config(ConfigError::TooLarge { .. }) => {
            (StatusCode::PAYLOAD_TOO_LARGE, "too_large")
        }
        GatewayError::Config(ConfigError::ReadFailed { .. }) => {
            (StatusCode::BAD_GATEWAY, "read_failed")
        }
        GatewayError::Config(ConfigError::WriteFailed { .. }) => {
            (StatusCode::BAD_GATEWAY, "write_failed")
        }
        GatewayError::Config(ConfigError::Run(e)) => classify_run(e, "command_failed"),
    }
}

fn classify_run(err: &RunError, io_code: &'static str) -> (StatusCode, &'static str) {
    match err {
        RunError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        RunError::Launch { .. } | RunError::SameIdentity { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "launch")
        }
        RunError::Io { .. } => (StatusCode::BAD_GATEWAY, io_code),
    }
}

fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let suffix = "…(truncated)";
    let mut end = max_bytes.saturating_sub(suffix.len()).max(1).min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = s[..end].to_string();
    out.push_str(suffix);
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(100);
        let out = truncate_utf8(&s, 51);
        assert!(out.ends_with("…(truncated)"));
        assert!(out.len() <= 51);
        assert_eq!(truncate_utf8("short", 51), "short");
    }

    #[test]
    fn subprocess_failures_map_to_gateway_statuses() {
        let timeout = GatewayError::Control(ControlError::Run(RunError::Timeout {
            program: "/home/css1/css1".to_string(),
            after: Duration::from_secs(15),
        }));
        assert_eq!(classify(&timeout), (StatusCode::GATEWAY_TIMEOUT, "timeout"));

        let launch = GatewayError::Config(ConfigError::Run(RunError::Launch {
            program: "sudo".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }));
        assert_eq!(
            classify(&launch),
            (StatusCode::INTERNAL_SERVER_ERROR, "launch")
        );

        let read = GatewayError::Config(ConfigError::ReadFailed {
            name: "common.cfg".to_string(),
            exit_code: Some(1),
            stderr: "cat: common.cfg: Permission denied".to_string(),
        });
        assert_eq!(classify(&read), (StatusCode::BAD_GATEWAY, "read_failed"));
    }

    #[test]
    fn error_body_carries_request_id() {
        let meta = RequestMeta {
            request_id: "req-1".to_string(),
        };
        let err = ApiError::from_gateway(&meta, GatewayError::ReadOnly);
        assert_eq!(err.status, StatusCode::CONFLICT);
        let body = serde_json::to_value(&err).unwrap();
        assert_eq!(body["code"], "read_only");
        assert_eq!(body["request_id"], "req-1");
        assert!(body.get("status").is_none());
    }
}
