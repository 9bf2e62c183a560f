use std::sync::Arc;

use courier_codec::{ContentId, EbxmlEnvelope, Part};
use courier_node::{
    AckCorrelator, Acceptance, ChannelPublisher, DeliveredPayload, DeliveryError, InMemoryLedger,
    OutboundMessage, ReliableReceiver, ReliableSender, ReplyRoutes, RetryPolicy, SenderState,
    TransportReplyDispatcher,
};
use courier_transport::{InMemoryTransport, OutboundRequest};
use tokio::sync::{mpsc, watch};

const NODE_A: &str = "http://node-a/ebxml";
const NODE_B: &str = "http://node-b/ebxml";

/// One gateway: a sender, the receiver sharing its correlator, and the
/// stream of requests its transport posts.
struct Node {
    sender: Arc<ReliableSender>,
    receiver: Arc<ReliableReceiver>,
    outbound: mpsc::UnboundedReceiver<OutboundRequest>,
    payloads: mpsc::Receiver<DeliveredPayload>,
    _shutdown: watch::Sender<bool>,
}

fn node(reply_routes: ReplyRoutes, publisher_capacity: usize) -> Node {
    let (transport, outbound) = InMemoryTransport::with_listener();
    let (shutdown, rx) = watch::channel(false);
    let correlator = AckCorrelator::new();
    let sender = Arc::new(ReliableSender::new(
        Arc::new(transport),
        correlator.clone(),
        RetryPolicy::default(),
        rx,
    ));
    let (publisher, payloads) = ChannelPublisher::new(publisher_capacity);
    let receiver = Arc::new(ReliableReceiver::new(
        Arc::new(InMemoryLedger::new(1024)),
        Arc::new(publisher),
        Arc::new(TransportReplyDispatcher::new(sender.clone(), reply_routes)),
        correlator,
    ));
    Node {
        sender,
        receiver,
        outbound,
        payloads,
        _shutdown: shutdown,
    }
}

/// Feeds every request posted by one node into another node's receiver.
fn wire(
    mut outbound: mpsc::UnboundedReceiver<OutboundRequest>,
    receiver: Arc<ReliableReceiver>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = outbound.recv().await {
            if let Acceptance::Accepted(exchange) =
                receiver.accept(&request.content_type, &request.body)
            {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    receiver.complete(exchange).await;
                });
            }
        }
    })
}

fn message() -> OutboundMessage {
    let mut envelope = EbxmlEnvelope::builder()
        .from_party("PARTY-A")
        .to_party("PARTY-B")
        .cpa_id("S1001A1630")
        .conversation_id("CONV-1")
        .service("urn:nhs:names:services:itk")
        .action("urn:nhs-itk:services:201005:SendCDADocument-v2-0")
        .message_id("E2E-0001")
        .duplicate_elimination(true)
        .ack_requested(true)
        .build()
        .expect("envelope builds");
    envelope
        .add_manifest_reference("cid:document@party-a", true, None)
        .expect("cid ref");
    OutboundMessage {
        endpoint: NODE_B.into(),
        envelope,
        payloads: vec![Part::new("application/xml", "<ClinicalDocument/>")
            .with_content_id(ContentId::from_logical("document@party-a"))],
    }
}

#[tokio::test(start_paused = true)]
async fn message_is_published_and_acknowledged_across_two_nodes() {
    let node_a = node(ReplyRoutes::default(), 8);
    let mut routes = ReplyRoutes::default();
    routes.insert("PARTY-A", NODE_A);
    let mut node_b = node(routes, 8);

    let a_to_b = wire(node_a.outbound, node_b.receiver.clone());
    let b_to_a = wire(node_b.outbound, node_a.receiver.clone());

    let report = node_a.sender.send(&message()).await.expect("acknowledged");
    assert_eq!(report.final_state(), Some(SenderState::Acked));
    assert_eq!(report.attempts, 1);

    let delivered = node_b.payloads.recv().await.expect("payload published");
    assert_eq!(delivered.message_id, "E2E-0001");
    assert_eq!(delivered.from_party, "PARTY-A");
    assert_eq!(delivered.parts.len(), 1);
    assert_eq!(
        delivered.parts[0].body_text().expect("text"),
        "<ClinicalDocument/>"
    );

    a_to_b.abort();
    b_to_a.abort();
}

#[tokio::test(start_paused = true)]
async fn delivery_failure_notifications_exhaust_retries() {
    let node_a = node(ReplyRoutes::default(), 8);
    let mut routes = ReplyRoutes::default();
    routes.insert("PARTY-A", NODE_A);
    let node_b = node(routes, 1);
    // The application side is gone, so every publish fails.
    drop(node_b.payloads);

    let a_to_b = wire(node_a.outbound, node_b.receiver.clone());
    let b_to_a = wire(node_b.outbound, node_a.receiver.clone());

    let err = node_a.sender.send(&message()).await.expect_err("never delivered");
    match err {
        DeliveryError::Exhausted {
            message_id,
            attempts,
            last,
        } => {
            assert_eq!(message_id, "E2E-0001");
            assert_eq!(attempts, 3);
            assert!(last.contains("delivery failure"), "last = {last}");
        }
        other => panic!("unexpected error {other:?}"),
    }

    a_to_b.abort();
    b_to_a.abort();
}
