use http::StatusCode;

/// Coarse classification handed to the mutation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No response was received.
    NetworkFailure,
    /// The server answered, but not with something usable.
    ServerRejection,
}

/// Errors returned by a remote collection gateway.
///
/// Every failure leaving the gateway has been normalized into one of these
/// variants, whatever shape the server's error body had.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("request rejected with status {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected {
        status: u16,
        message: Option<String>,
    },

    #[error("invalid response body: {0}")]
    InvalidResponse(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl GatewayError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GatewayError::Network(_) | GatewayError::InvalidUrl(_) => FailureKind::NetworkFailure,
            GatewayError::Rejected { .. } | GatewayError::InvalidResponse(_) => {
                FailureKind::ServerRejection
            }
        }
    }

    /// The message to show a user: the server's own message when it sent one,
    /// otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            GatewayError::Rejected {
                message: Some(message),
                ..
            } => message.clone(),
            _ => fallback.to_string(),
        }
    }

    /// Builds a rejection from a non-success response.
    ///
    /// Error bodies are sometimes `{"message": ...}`, sometimes `{"error": ...}`
    /// and sometimes not JSON at all.
    pub fn from_error_body(status: StatusCode, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                ["message", "error"].iter().find_map(|key| {
                    value
                        .get(key)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                })
            })
            .filter(|message| !message.trim().is_empty());

        GatewayError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_with_message() {
        let err = GatewayError::from_error_body(
            StatusCode::BAD_REQUEST,
            br#"{"message": "Child already assigned"}"#,
        );
        assert_eq!(
            err,
            GatewayError::Rejected {
                status: 400,
                message: Some("Child already assigned".into())
            }
        );
        assert_eq!(err.kind(), FailureKind::ServerRejection);
        assert_eq!(err.user_message("Failed"), "Child already assigned");
    }

    #[test]
    fn test_error_body_with_error_key() {
        let err = GatewayError::from_error_body(StatusCode::FORBIDDEN, br#"{"error": "nope"}"#);
        assert_eq!(err.user_message("Failed"), "nope");
    }

    #[test]
    fn test_error_body_not_json() {
        let err = GatewayError::from_error_body(
            StatusCode::BAD_GATEWAY,
            b"<html>bad gateway</html>",
        );
        assert_eq!(
            err,
            GatewayError::Rejected {
                status: 502,
                message: None
            }
        );
        assert_eq!(err.user_message("Failed to remove child"), "Failed to remove child");
        assert_eq!(
            err.to_string(),
            "request rejected with status 502: no message"
        );
    }

    #[test]
    fn test_network_kind() {
        let err = GatewayError::Network("connection refused".into());
        assert_eq!(err.kind(), FailureKind::NetworkFailure);
        assert_eq!(err.user_message("Failed to fetch guardians"), "Failed to fetch guardians");
    }
}
