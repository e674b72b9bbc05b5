use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Info,
    Warn,
    Fail,
    Error,
    Success,
}

/// How the client is expected to surface the error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertOptions {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub duration: u32,
}

impl Default for AlertOptions {
    fn default() -> Self {
        Self {
            alert_type: AlertType::Error,
            title: None,
            duration: 3000,
        }
    }
}

/// User-facing failure whose message is safe to show as-is.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ControlledError {
    pub message: String,
    pub status: StatusCode,
    pub alert_options: AlertOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlledErrorPayload {
    pub err_type: &'static str,
    pub status: u16,
    #[serde(rename = "errUUID")]
    pub err_uuid: String,
    pub message: String,
    pub timestamp: String,
    pub alert_options: AlertOptions,
}

impl ControlledError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: StatusCode::BAD_REQUEST,
            alert_options: AlertOptions::default(),
        }
    }

    /// Validation failures shown as a short warning toast.
    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(message).with_alert(AlertType::Warn, 4000)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_alert(mut self, alert_type: AlertType, duration: u32) -> Self {
        self.alert_options.alert_type = alert_type;
        self.alert_options.duration = duration;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.alert_options.title = Some(title.into());
        self
    }

    pub fn payload(&self) -> ControlledErrorPayload {
        ControlledErrorPayload {
            err_type: "ControlledError",
            status: self.status.as_u16(),
            err_uuid: Uuid::new_v4().to_string(),
            message: self.message.clone(),
            timestamp: Utc::now().to_rfc3339(),
            alert_options: self.alert_options.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Controlled(#[from] ControlledError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Multipart error: {0}")]
    Multipart(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn as_controlled(&self) -> Option<&ControlledError> {
        match self {
            AppError::Controlled(e) => Some(e),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err_uuid = Uuid::new_v4().to_string();
        let timestamp = Utc::now().to_rfc3339();

        match self {
            AppError::Controlled(e) => return (e.status, Json(e.payload())).into_response(),
            AppError::Multipart(msg) => {
                tracing::warn!(err_uuid = %err_uuid, "Malformed multipart body: {}", msg);
                let body = Json(json!({
                    "errType": "Error",
                    "errUUID": err_uuid,
                    "timestamp": timestamp,
                    "status": StatusCode::BAD_REQUEST.as_u16(),
                    "message": msg,
                }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            }
            _ => {}
        }

        match &self {
            AppError::Database(e) => {
                tracing::error!(err_uuid = %err_uuid, "Database error: {:?}", e)
            }
            AppError::Io(e) => tracing::error!(err_uuid = %err_uuid, "I/O error: {:?}", e),
            AppError::Anyhow(e) => tracing::error!(err_uuid = %err_uuid, "Anyhow error: {:?}", e),
            other => tracing::error!(err_uuid = %err_uuid, "Internal error: {}", other),
        }

        let body = Json(json!({
            "errType": "Error",
            "errUUID": err_uuid,
            "timestamp": timestamp,
            "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            "message": "Internal Server Error",
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
