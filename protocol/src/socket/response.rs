//! The single JSON object written back before the socket closes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// `{"status": "ok"|"error", "cause": .., "errorMessage": ..}`.
///
/// Both message fields carry the same text on error and are null on
/// success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketResponse {
    pub status: ResponseStatus,
    pub cause: Option<String>,
    pub error_message: Option<String>,
}

impl SocketResponse {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            cause: None,
            error_message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: ResponseStatus::Error,
            cause: Some(message.clone()),
            error_message: Some(message),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn to_json(&self) -> String {
        // Only strings and a unit enum: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"status":"error"}"#.to_string())
    }
}
