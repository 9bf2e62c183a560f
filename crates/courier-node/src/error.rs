use courier_codec::CodecError;
use courier_core::IdError;
use thiserror::Error;

/// Terminal outcomes of an outbound exchange other than acknowledgment.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The peer rejected the exchange synchronously; never retried.
    #[error("message {message_id} permanently rejected: {reason}")]
    PermanentRejection { message_id: String, reason: String },
    /// The peer answered asynchronously with a fault.
    #[error("message {message_id} negatively acknowledged: {code}: {description}")]
    Nacked {
        message_id: String,
        code: String,
        description: String,
    },
    /// Every attempt failed transiently or timed out waiting for an ack.
    #[error("message {message_id} not acknowledged after {attempts} attempts: {last}")]
    Exhausted {
        message_id: String,
        attempts: u32,
        last: String,
    },
    /// No reply endpoint is configured for the party.
    #[error("no reply route for party {0}")]
    NoRoute(String),
    #[error("delivery cancelled by shutdown")]
    Cancelled,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("id generation failed: {0}")]
    Id(#[from] IdError),
}

/// Application-side publish failures.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish channel closed")]
    Closed,
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Errors returned by delivery ledgers and their persistence helpers.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode ledger snapshot: {0}")]
    Encode(String),
    #[error("failed to decode ledger snapshot: {0}")]
    Decode(String),
    #[error("failed to read ledger file: {0}")]
    Read(std::io::Error),
    #[error("failed to write ledger file: {0}")]
    Write(std::io::Error),
}

#[derive(Debug, Error)]
pub enum AddressError {
    /// The backing directory could not be queried.
    #[error("address lookup failed: {0}")]
    Lookup(String),
    #[error("no endpoint address for {0}")]
    NotFound(String),
}
