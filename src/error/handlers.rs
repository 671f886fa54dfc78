//! Standardized mapping from registry HTTP failures to typed errors

use crate::error::SyncError;
use reqwest::StatusCode;
use std::time::Duration;

/// Maps registry responses onto the crate error taxonomy
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Classify a non-success registry response
    pub fn handle_registry_error(status: StatusCode, error_text: &str, operation: &str) -> SyncError {
        match status.as_u16() {
            401 => SyncError::Auth(format!(
                "Unauthorized to perform {}: {}",
                operation, error_text
            )),
            403 => SyncError::Auth(format!(
                "Forbidden: insufficient permissions for {}: {}",
                operation, error_text
            )),
            404 => SyncError::NotFound(format!("{}: {}", operation, error_text)),
            429 => SyncError::Registry(format!("Rate limited during {}: {}", operation, error_text)),
            500 => SyncError::Registry(format!(
                "Registry server error during {}: {}",
                operation, error_text
            )),
            502 | 503 => SyncError::Registry(format!(
                "Registry unavailable for {}: {}",
                operation, error_text
            )),
            _ => SyncError::Registry(format!(
                "{} failed (status {}): {}",
                operation, status, error_text
            )),
        }
    }

    /// Statuses the transport layer retries on its own
    pub fn is_transient(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 502 | 503 | 504)
    }

    /// Exponential backoff, capped at 16x the base delay
    pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
        base * 2_u32.pow(attempt.min(4))
    }
}

/// Network error categorization
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> SyncError {
        if error.is_timeout() {
            SyncError::Network(format!("{} timed out: {}", context, error))
        } else if error.is_connect() {
            SyncError::Network(format!("Connection error during {}: {}", context, error))
        } else if error.to_string().contains("certificate") {
            SyncError::Network(format!("TLS certificate error during {}: {}", context, error))
        } else {
            SyncError::Network(format!("{} network error: {}", context, error))
        }
    }

    /// Connect and timeout failures are worth another attempt
    pub fn is_transient(error: &reqwest::Error) -> bool {
        error.is_connect() || error.is_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            HttpErrorHandler::handle_registry_error(StatusCode::NOT_FOUND, "", "manifest resolve"),
            SyncError::NotFound(_)
        ));
        assert!(matches!(
            HttpErrorHandler::handle_registry_error(StatusCode::UNAUTHORIZED, "", "push"),
            SyncError::Auth(_)
        ));
        assert!(matches!(
            HttpErrorHandler::handle_registry_error(StatusCode::FORBIDDEN, "", "push"),
            SyncError::Auth(_)
        ));
        assert!(matches!(
            HttpErrorHandler::handle_registry_error(StatusCode::BAD_GATEWAY, "", "push"),
            SyncError::Registry(_)
        ));
    }

    #[test]
    fn test_transient_statuses() {
        assert!(HttpErrorHandler::is_transient(StatusCode::SERVICE_UNAVAILABLE));
        assert!(HttpErrorHandler::is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(!HttpErrorHandler::is_transient(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let base = Duration::from_millis(100);
        assert_eq!(HttpErrorHandler::retry_delay(0, base), Duration::from_millis(100));
        assert_eq!(HttpErrorHandler::retry_delay(2, base), Duration::from_millis(400));
        assert_eq!(HttpErrorHandler::retry_delay(9, base), Duration::from_millis(1600));
    }
}
