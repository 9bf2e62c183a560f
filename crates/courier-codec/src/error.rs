use thiserror::Error;

/// Errors returned by multipart/envelope codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Multipart framing could not be parsed.
    #[error("malformed multipart: {0}")]
    MalformedMultipart(String),
    /// Envelope XML is structurally invalid or missing required data.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// Manifest reference href is not a `cid:` reference.
    #[error("invalid manifest reference: {0}")]
    InvalidManifestReference(String),
    /// Part body uses a transfer encoding this codec cannot undo.
    #[error("unsupported content-transfer-encoding: {0}")]
    UnsupportedTransferEncoding(String),
    /// Part body did not decode under its declared transfer encoding.
    #[error("invalid {encoding} body: {reason}")]
    InvalidBody {
        encoding: &'static str,
        reason: String,
    },
}
