use domain::DomainError;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// No response arrived (connect failure, timeout, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-2xx status.
    #[error("API error {status}: {detail}")]
    Api { status: u16, detail: String },

    /// Token refresh failed; the user has to log in again.
    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid geofence: {0}")]
    InvalidGeofence(String),

    /// Repeated poll failures. Advisory, never fatal.
    #[error("Connectivity degraded after {failures} consecutive failed polls")]
    ConnectivityDegraded { failures: u32 },

    /// The response body did not match the endpoint's schema.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The tracker runtime is no longer mounted.
    #[error("Tracker stopped")]
    TrackerStopped,
}

impl ClientError {
    /// Builds an `Api` error from a failed response, pulling the message out
    /// of the JSON body's `detail`, `message` or `error` field.
    pub fn from_response(status: u16, body: &str) -> Self {
        ClientError::Api {
            status,
            detail: extract_detail(body),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ClientError::SessionExpired)
    }

    /// Failures a polling loop swallows and retries on its next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::InvalidResponse(_) => true,
            ClientError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

fn extract_detail(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "message", "error"] {
            match map.get(key) {
                Some(Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "An error occurred".to_string()
    } else {
        trimmed.to_string()
    }
}

impl From<DomainError> for ClientError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidGeofence(msg) => ClientError::InvalidGeofence(msg),
            DomainError::InvalidPosition(msg) => ClientError::Validation(msg),
            DomainError::MalformedRecord(msg) => ClientError::InvalidResponse(msg),
            DomainError::UnknownDevice(id) => ClientError::NotFound(format!("device {}", id)),
            DomainError::NoPosition(id) => {
                ClientError::NotFound(format!("position for device {}", id))
            }
        }
    }
}

impl From<validator::ValidationErrors> for ClientError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", field))
                })
            })
            .collect();

        let message = if messages.len() == 1 {
            messages[0].clone()
        } else {
            format!("{} validation errors", messages.len())
        };

        ClientError::Validation(message)
    }
}

impl From<validator::ValidationError> for ClientError {
    fn from(err: validator::ValidationError) -> Self {
        let message = err
            .message
            .map(|m| m.to_string())
            .unwrap_or_else(|| err.code.to_string());
        ClientError::Validation(message)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::InvalidResponse(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_from_json_body() {
        let err = ClientError::from_response(400, r#"{"detail": "Invalid polygon"}"#);
        assert_eq!(
            err,
            ClientError::Api {
                status: 400,
                detail: "Invalid polygon".to_string()
            }
        );

        let err = ClientError::from_response(403, r#"{"message": "Forbidden"}"#);
        assert_eq!(err.to_string(), "API error 403: Forbidden");

        let err = ClientError::from_response(422, r#"{"error": {"name": ["required"]}}"#);
        assert_eq!(
            err,
            ClientError::Api {
                status: 422,
                detail: r#"{"name":["required"]}"#.to_string()
            }
        );
    }

    #[test]
    fn test_detail_falls_back_to_raw_body() {
        let err = ClientError::from_response(502, "Bad Gateway");
        assert_eq!(
            err,
            ClientError::Api {
                status: 502,
                detail: "Bad Gateway".to_string()
            }
        );
        let err = ClientError::from_response(500, "   ");
        assert_eq!(err.to_string(), "API error 500: An error occurred");
    }

    #[test]
    fn test_unauthorized_and_transient() {
        assert!(ClientError::from_response(401, "").is_unauthorized());
        assert!(ClientError::from_response(503, "").is_transient());
        assert!(!ClientError::from_response(404, "").is_transient());
        assert!(ClientError::Network("timeout".into()).is_transient());
        assert!(!ClientError::SessionExpired.is_transient());
        assert!(ClientError::SessionExpired.is_session_expired());
    }

    #[test]
    fn test_from_domain_error() {
        let err: ClientError = DomainError::InvalidGeofence("too few".into()).into();
        assert_eq!(err, ClientError::InvalidGeofence("too few".into()));
        let err: ClientError = DomainError::UnknownDevice("D9".into()).into();
        assert_eq!(err, ClientError::NotFound("device D9".into()));
    }

    #[test]
    fn test_display() {
        assert_eq!(ClientError::SessionExpired.to_string(), "Session expired");
        assert_eq!(
            ClientError::ConnectivityDegraded { failures: 3 }.to_string(),
            "Connectivity degraded after 3 consecutive failed polls"
        );
    }
}
