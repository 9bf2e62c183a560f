use thiserror::Error;

/// Transport failures. Both variants are transient from the sender's view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint could not be reached (refused, DNS, timeout).
    #[error("connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },
    /// The exchange started but failed at the HTTP layer.
    #[error("http exchange with {endpoint} failed: {reason}")]
    Http { endpoint: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::TransportError;

    #[test]
    fn error_messages_are_stable() {
        let err = TransportError::Connection {
            endpoint: "http://spine".into(),
            reason: "refused".into(),
        };
        assert_eq!(err.to_string(), "connection to http://spine failed: refused");
    }
}
