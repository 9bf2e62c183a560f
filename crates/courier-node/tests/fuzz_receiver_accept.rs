use std::sync::Arc;

use courier_codec::{ContentId, EbxmlEnvelope, MultipartBody, Part};
use courier_node::{
    AckCorrelator, Acceptance, ChannelPublisher, InMemoryLedger, ReliableReceiver, ReplyRoutes,
    ReliableSender, RetryPolicy, TransportReplyDispatcher,
};
use courier_transport::InMemoryTransport;
use tokio::sync::watch;

fn xorshift64(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut s = seed.max(1);
    let mut out = vec![0_u8; len];
    for b in &mut out {
        *b = (xorshift64(&mut s) & 0xFF) as u8;
    }
    out
}

fn receiver() -> ReliableReceiver {
    let (_shutdown, rx) = watch::channel(false);
    let correlator = AckCorrelator::new();
    let sender = Arc::new(ReliableSender::new(
        Arc::new(InMemoryTransport::new()),
        correlator.clone(),
        RetryPolicy::default(),
        rx,
    ));
    let (publisher, _payloads) = ChannelPublisher::new(8);
    ReliableReceiver::new(
        Arc::new(InMemoryLedger::new(64)),
        Arc::new(publisher),
        Arc::new(TransportReplyDispatcher::new(sender, ReplyRoutes::default())),
        correlator,
    )
}

fn valid_exchange() -> (String, Vec<u8>) {
    let mut envelope = EbxmlEnvelope::builder()
        .from_party("PEER")
        .to_party("US")
        .cpa_id("CPA")
        .conversation_id("C")
        .service("urn:svc")
        .action("Act")
        .message_id("M1")
        .build()
        .expect("envelope builds");
    envelope
        .add_manifest_reference("cid:doc@peer", true, None)
        .expect("cid ref");
    let mut body = MultipartBody::with_boundary("--=_accept");
    body.push_part(Part::new("text/xml", envelope.render()));
    body.push_part(
        Part::new("application/xml", "<doc/>").with_content_id(ContentId::from_logical("doc@peer")),
    );
    (body.content_type_header(), body.serialize())
}

#[test]
fn fuzz_like_receiver_accept_does_not_panic() {
    let receiver = receiver();
    let (content_type, _) = valid_exchange();

    for i in 0..1000_u64 {
        let len = ((i as usize) * 131) % 4096;
        let data = random_bytes(0xC0FFEE ^ i, len);
        let outcome = receiver.accept(&content_type, &data);
        assert!(
            matches!(outcome, Acceptance::Malformed(_)),
            "random input {i} should never be accepted"
        );
    }
}

#[test]
fn mutated_valid_exchanges_are_classified_without_panicking() {
    let receiver = receiver();
    let (content_type, mut wire) = valid_exchange();
    assert!(matches!(
        receiver.accept(&content_type, &wire),
        Acceptance::Accepted(_)
    ));

    for i in 0..512_usize {
        let idx = (i * 7919) % wire.len();
        wire[idx] ^= (i as u8).wrapping_mul(17).wrapping_add(3);
        let _ = receiver.accept(&content_type, &wire);
    }
}
