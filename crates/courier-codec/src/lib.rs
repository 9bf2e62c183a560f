//! Courier wire codec primitives.
//!
//! Defines the MIME header collection, content identifiers, the
//! multipart/related codec and the ebXML envelope model with its XML
//! parse/render and reply derivation operations.

pub mod content_id;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod multipart;

pub use content_id::ContentId;
pub use envelope::{
    EbxmlEnvelope, EnvelopeKind, ErrorInfo, ManifestReference, MessageData,
};
pub use error::CodecError;
pub use headers::EntrySeries;
pub use multipart::{MultipartBody, Part};
