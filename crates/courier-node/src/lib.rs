//! Courier node-layer primitives.
//!
//! This crate wires manifest verification, the reliable sender/receiver
//! state machine, the idempotent delivery ledger, reply correlation and
//! endpoint address resolution on top of the codec and pluggable transports.

pub mod address;
pub mod config;
pub mod correlator;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod publish;
pub mod receiver;
pub mod reply;
pub mod sender;
pub mod verify;

pub use address::{
    CachingEndpointAddressRepository, EndpointAddress, EndpointAddressIdentifier,
    EndpointAddressRepository, LayeredEndpointAddressRepository, LookupType,
    StaticEndpointAddressRepository,
};
pub use config::DeliveryConfig;
pub use correlator::{AckCorrelator, AsyncReply, PendingReply};
pub use error::{AddressError, DeliveryError, LedgerError, PublishError};
pub use ledger::{ClaimOutcome, DeliveryLedger, InMemoryLedger, LedgerSnapshot};
pub use publish::{ChannelPublisher, DeliveredPayload, PayloadPublisher};
pub use receiver::{Acceptance, ReceiverState, ReliableReceiver, VerifiedExchange};
pub use reply::{ReplyDispatcher, ReplyRoutes, TransportReplyDispatcher};
pub use sender::{OutboundMessage, ReliableSender, RetryPolicy, SendReport, SenderState};
pub use verify::{verify_manifest, ManifestVerification};
