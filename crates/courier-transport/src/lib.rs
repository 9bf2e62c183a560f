//! Transport abstractions for Courier.
//!
//! The delivery state machine only depends on the async [`Transport`] trait
//! defined here. [`HttpTransport`] is the production implementation; the
//! in-memory transport scripts responses for tests and simulations.

pub mod adapter;
pub mod error;
pub mod http;

pub use adapter::{
    InMemoryTransport, OutboundRequest, Transport, TransportHealthSnapshot, TransportResponse,
};
pub use error::TransportError;
pub use http::HttpTransport;
