use thiserror::Error;

/// Reasons a single command directive is skipped
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("Unknown directive: {directive}")]
    UnknownDirective { directive: String },

    #[error("Wrong field count in {directive}: {count} fields")]
    FieldCount { directive: String, count: usize },

    #[error("Invalid threshold in {directive}: {value}")]
    InvalidThreshold { directive: String, value: String },

    #[error("Missing plan hash in {directive}")]
    EmptyHash { directive: String },
}

/// Errors raised while talking to the remote collector
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    #[error("Request failed: {reason}")]
    Request { reason: String },
}

/// Errors that abandon one report cycle
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to collect metrics: {reason}")]
    Collect { reason: String },

    #[error("Failed to encode payload: {reason}")]
    Encode { reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Collector rejected payload with status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Previous report still in flight")]
    InFlight,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_error_formatting() {
        let error = DirectiveError::InvalidThreshold {
            directive: "qp:abc:h1".to_string(),
            value: "abc".to_string(),
        };

        let msg = error.to_string();
        assert!(msg.contains("qp:abc:h1"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn test_status_error_formatting() {
        let error = ReportError::Status {
            code: 503,
            body: "unavailable".to_string(),
        };

        let msg = error.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("unavailable"));
    }

    #[test]
    fn test_transport_error_converts_transparently() {
        let error: ReportError = TransportError::Timeout { timeout_secs: 15 }.into();
        assert_eq!(error.to_string(), "Request timed out after 15s");
    }
}
