/*
    gossip_flow.rs - Messages travelling across several in-process nodes

    Nodes are connected through their outbound queues directly; a "link" is
    just a receiver whose frames we hand to the other node's handler.
*/

use agora_core::core_gossip::{GossipHandler, InboundOutcome, NetworkMessage, PeerId, WireError};
use agora_core::core_payload::{AgentRole, Capabilities, Capability, ProtectedStorageEntry};
use agora_core::core_storage::RejectReason;
use agora_core::test_utils::{
    deterministic_keypair, dispute_agent_payload, drain, mailbox_payload, offer_payload,
    recv_timeout, trade_statistics, TestStorage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const START: u64 = 1_700_000_000_000;

type Link = mpsc::Receiver<Arc<Vec<u8>>>;

/// Connect `from` to `to`: returns the queue of frames `from` sends to `to`
async fn link(from: &GossipHandler, to_name: &str, capabilities: Capabilities) -> Link {
    let (tx, rx) = mpsc::channel(64);
    from.on_peer_connected(PeerId::new(to_name), tx).await;
    from.on_capabilities(PeerId::new(to_name), capabilities).await;
    rx
}

#[tokio::test]
async fn test_publish_reaches_every_node_once() {
    let a = TestStorage::new(START);
    let b = TestStorage::new(START);
    let c = TestStorage::new(START);
    let (ha, hb, hc) = (a.handler(), b.handler(), c.handler());

    // a - b - c line, links in both directions
    let mut a_to_b = link(&ha, "b", Capabilities::all()).await;
    let mut b_to_a = link(&hb, "a", Capabilities::all()).await;
    let mut b_to_c = link(&hb, "c", Capabilities::all()).await;
    let _c_to_b = link(&hc, "b", Capabilities::all()).await;

    let owner = deterministic_keypair(31);
    let payload = offer_payload(&owner, "travelling");
    let key = payload.hash().unwrap();
    assert_eq!(ha.publish_protected(payload, &owner).await.unwrap().sent, 1);

    let frame = recv_timeout(&mut a_to_b, Duration::from_secs(1)).await.unwrap();
    let outcome = hb.handle_frame(&PeerId::new("a"), &frame).await;
    assert!(matches!(outcome, InboundOutcome::Relayed(ref report) if report.sent == 1 && report.skipped_origin));

    // b relays to c but never echoes back to a
    assert!(drain(&mut b_to_a).is_empty());
    let relayed = recv_timeout(&mut b_to_c, Duration::from_secs(1)).await.unwrap();
    assert!(matches!(hc.handle_frame(&PeerId::new("b"), &relayed).await, InboundOutcome::Relayed(_)));

    for node in [&a, &b, &c] {
        assert!(node.storage.contains_key(&key).unwrap());
    }

    // c hearing the same message again changes nothing and relays nothing
    assert_eq!(hc.handle_frame(&PeerId::new("b"), &relayed).await, InboundOutcome::NoChange);
}

#[tokio::test]
async fn test_version_zero_frame_rejected() {
    let node = TestStorage::new(START);
    let handler = node.handler();
    let owner = deterministic_keypair(32);
    let entry = ProtectedStorageEntry::sign(offer_payload(&owner, "v0"), 1, &owner, START).unwrap();

    let mut frame = NetworkMessage::AddData(entry.into()).encode().unwrap();
    frame[..4].copy_from_slice(&0u32.to_be_bytes());

    assert_eq!(
        handler.handle_frame(&PeerId::new("old"), &frame).await,
        InboundOutcome::InvalidFrame(WireError::UnsupportedVersion(0))
    );
    assert!(node.storage.is_empty().unwrap());
}

#[tokio::test]
async fn test_duplicate_broadcast_suppressed() {
    let node = TestStorage::new(START);
    let handler = node.handler();
    let mut out = link(&handler, "peer", Capabilities::all()).await;
    let message = NetworkMessage::AddPersistablePayload(trade_statistics("EUR", 100, START));

    let first = handler.broadcaster().broadcast(&message, None).await.unwrap();
    let second = handler.broadcaster().broadcast(&message, None).await.unwrap();

    assert_eq!(first.sent, 1);
    assert!(second.duplicate);
    assert_eq!(drain(&mut out).len(), 1);
}

#[tokio::test]
async fn test_capability_gating_for_dispute_agents() {
    let node = TestStorage::new(START);
    let handler = node.handler();
    let mut mediation_aware = link(&handler, "modern", Capability::Mediation.into()).await;
    let mut legacy = link(&handler, "legacy", Capability::TradeStatistics.into()).await;
    let (tx, mut silent) = mpsc::channel(8);
    handler.on_peer_connected(PeerId::new("silent"), tx).await;

    let agent = deterministic_keypair(33);
    let report = handler
        .publish_protected(dispute_agent_payload(&agent, AgentRole::Mediator), &agent)
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.skipped_capability, 2);
    assert_eq!(drain(&mut mediation_aware).len(), 1);
    assert!(drain(&mut legacy).is_empty());
    assert!(drain(&mut silent).is_empty());

    // offers need no capability and go everywhere
    let owner = deterministic_keypair(34);
    let report = handler.publish_protected(offer_payload(&owner, "open"), &owner).await.unwrap();
    assert_eq!(report.sent, 3);
}

#[tokio::test]
async fn test_mailbox_messages_only_reach_mailbox_peers() {
    let node = TestStorage::new(START);
    let handler = node.handler();
    let mut inbox_peer = link(&handler, "inbox", Capability::Mailbox.into()).await;
    let mut legacy = link(&handler, "legacy", Capability::TradeStatistics.into()).await;

    let sender = deterministic_keypair(37);
    let receiver = deterministic_keypair(38);
    let report = handler
        .publish_mailbox(mailbox_payload(&sender, receiver.public_key(), "sealed"), &sender)
        .await
        .unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.skipped_capability, 1);
    assert_eq!(drain(&mut inbox_peer).len(), 1);
    assert!(drain(&mut legacy).is_empty());
}

#[tokio::test]
async fn test_forged_entry_stops_at_first_hop() {
    let a = TestStorage::new(START);
    let ha = a.handler();
    let mut onward = link(&ha, "c", Capabilities::all()).await;

    let owner = deterministic_keypair(35);
    let forger = deterministic_keypair(36);
    // forger signs an offer that names `owner`
    let entry = ProtectedStorageEntry::sign(offer_payload(&owner, "forged"), 1, &forger, START).unwrap();
    let frame = NetworkMessage::AddData(entry.into()).encode().unwrap();

    assert_eq!(
        ha.handle_frame(&PeerId::new("b"), &frame).await,
        InboundOutcome::Rejected(RejectReason::OwnerMismatch)
    );
    assert!(drain(&mut onward).is_empty());
    assert!(a.storage.is_empty().unwrap());
}
