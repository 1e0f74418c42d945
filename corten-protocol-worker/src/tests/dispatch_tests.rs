use crate::tests::tools::{harness, peer};
use corten_consensus_exports::{ConsensusMessage, GossipEvent};
use corten_hash::Hash;
use corten_models::block_id::{BlockId, PartSetHeader};
use corten_models::vote::{SignedMsgType, Vote};
use corten_network_exports::{ChannelId, NetworkCommand, NetworkEvent};
use corten_protocol_exports::{
    BlockSyncMessage, BlockSyncMessageDeserializer, BlockSyncMessageSerializer, DataMessage,
    DataMessageSerializer, MempoolMessage, MempoolMessageSerializer, ProtocolEvent,
};
use corten_serialization::{DeserializeError, Deserializer, Serializer};
use corten_signature::{KeyPair, Signature, SIGNATURE_SIZE_BYTES};
use corten_time::Timestamp;
use std::time::Duration;
use tokio::time::timeout;

const TEST_DEADLINE: Duration = Duration::from_secs(5);

async fn next_send_to_peer(
    harness: &mut crate::tests::tools::Harness,
) -> (ChannelId, Vec<u8>) {
    loop {
        match timeout(TEST_DEADLINE, harness.network_command_rx.recv())
            .await
            .expect("no network command")
            .expect("network channel closed")
        {
            NetworkCommand::SendMessage { channel, data, .. } => return (channel, data),
            _ => continue,
        }
    }
}

async fn next_broadcast(
    harness: &mut crate::tests::tools::Harness,
    wanted: ChannelId,
) -> Vec<u8> {
    loop {
        match timeout(TEST_DEADLINE, harness.network_command_rx.recv())
            .await
            .expect("no network command")
            .expect("network channel closed")
        {
            NetworkCommand::Broadcast { channel, data } if channel == wanted => return data,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn fresh_peer_gets_status() {
    let mut harness = harness(false);
    harness
        .network_event_tx
        .send(NetworkEvent::PeerConnected {
            peer_id: peer(),
            address: "127.0.0.1:1000".parse().unwrap(),
            outbound: false,
        })
        .await
        .unwrap();

    // the peer is greeted with a status request and our status
    let (channel, data) = next_send_to_peer(&mut harness).await;
    assert_eq!(channel, ChannelId::BlockSync);
    let (_, message) = BlockSyncMessageDeserializer::new()
        .deserialize::<DeserializeError>(&data)
        .unwrap();
    assert_eq!(message, BlockSyncMessage::StatusRequest);

    let (channel, data) = next_send_to_peer(&mut harness).await;
    assert_eq!(channel, ChannelId::BlockSync);
    let (_, message) = BlockSyncMessageDeserializer::new()
        .deserialize::<DeserializeError>(&data)
        .unwrap();
    assert_eq!(
        message,
        BlockSyncMessage::StatusResponse { base: 0, height: 0 }
    );

    harness.manager.stop().await;
}

#[tokio::test]
async fn status_requests_are_answered() {
    let mut harness = harness(false);
    let peer_id = peer();
    harness
        .network_event_tx
        .send(NetworkEvent::PeerConnected {
            peer_id,
            address: "127.0.0.1:1000".parse().unwrap(),
            outbound: false,
        })
        .await
        .unwrap();
    // drain the greeting
    let _ = next_send_to_peer(&mut harness).await;
    let _ = next_send_to_peer(&mut harness).await;

    let request = BlockSyncMessageSerializer::new()
        .serialize_to_vec(&BlockSyncMessage::StatusRequest)
        .unwrap();
    harness
        .network_event_tx
        .send(NetworkEvent::MessageReceived {
            peer_id,
            channel: ChannelId::BlockSync,
            data: request,
        })
        .await
        .unwrap();

    let (channel, data) = next_send_to_peer(&mut harness).await;
    assert_eq!(channel, ChannelId::BlockSync);
    let (_, message) = BlockSyncMessageDeserializer::new()
        .deserialize::<DeserializeError>(&data)
        .unwrap();
    assert!(matches!(message, BlockSyncMessage::StatusResponse { .. }));

    harness.manager.stop().await;
}

#[tokio::test]
async fn peer_votes_reach_consensus() {
    let mut harness = harness(false);
    let peer_id = peer();
    harness
        .network_event_tx
        .send(NetworkEvent::PeerConnected {
            peer_id,
            address: "127.0.0.1:1000".parse().unwrap(),
            outbound: false,
        })
        .await
        .unwrap();

    let keypair = KeyPair::generate();
    let mut vote = Vote {
        vote_type: SignedMsgType::Prevote,
        height: 1,
        round: 0,
        block_id: BlockId::ZERO,
        timestamp: Timestamp::from_millis(7),
        validator_address: corten_models::address::Address::from_public_key(
            &keypair.get_public_key(),
        ),
        validator_index: 0,
        signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
    };
    vote.sign("protocol-test", &keypair);
    let data = corten_protocol_exports::VoteChannelMessageSerializer::new()
        .serialize_to_vec(&corten_protocol_exports::VoteChannelMessage::Vote(
            vote.clone(),
        ))
        .unwrap();
    harness
        .network_event_tx
        .send(NetworkEvent::MessageReceived {
            peer_id,
            channel: ChannelId::Vote,
            data,
        })
        .await
        .unwrap();

    let info = timeout(TEST_DEADLINE, harness.consensus_message_rx.recv())
        .await
        .expect("vote never forwarded")
        .expect("consensus channel closed");
    assert_eq!(info.peer_id, Some(peer_id.to_string()));
    match info.msg {
        ConsensusMessage::Vote(forwarded) => assert_eq!(forwarded, vote),
        other => panic!("unexpected message {:?}", other),
    }

    harness.manager.stop().await;
}

#[tokio::test]
async fn gossip_events_broadcast() {
    let mut harness = harness(false);
    let keypair = KeyPair::generate();
    let mut vote = Vote {
        vote_type: SignedMsgType::Precommit,
        height: 1,
        round: 0,
        block_id: BlockId {
            hash: Hash::compute_from(b"gossip"),
            part_set_header: PartSetHeader {
                total: 1,
                hash: Hash::compute_from(b"gossip"),
            },
        },
        timestamp: Timestamp::from_millis(7),
        validator_address: corten_models::address::Address::from_public_key(
            &keypair.get_public_key(),
        ),
        validator_index: 0,
        signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
    };
    vote.sign("protocol-test", &keypair);
    harness.gossip_tx.send(GossipEvent::Vote(vote)).await.unwrap();
    let _ = next_broadcast(&mut harness, ChannelId::Vote).await;

    harness.manager.stop().await;
}

#[tokio::test]
async fn mempool_traffic_flows_both_ways() {
    let mut harness = harness(false);
    let peer_id = peer();
    harness
        .network_event_tx
        .send(NetworkEvent::PeerConnected {
            peer_id,
            address: "127.0.0.1:1000".parse().unwrap(),
            outbound: false,
        })
        .await
        .unwrap();

    // inbound gossip lands in the pool intake
    let data = MempoolMessageSerializer::new()
        .serialize_to_vec(&MempoolMessage::Tx(corten_models::block::Tx(vec![1, 2])))
        .unwrap();
    harness
        .network_event_tx
        .send(NetworkEvent::MessageReceived {
            peer_id,
            channel: ChannelId::Mempool,
            data,
        })
        .await
        .unwrap();
    let tx = timeout(TEST_DEADLINE, harness.pool_tx_rx.recv())
        .await
        .expect("tx never forwarded")
        .expect("pool channel closed");
    assert_eq!(tx.0, vec![1, 2]);

    // admitted transactions go back out as broadcasts
    harness
        .tx_broadcast_tx
        .send(corten_models::block::Tx(vec![9]))
        .await
        .unwrap();
    let _ = next_broadcast(&mut harness, ChannelId::Mempool).await;

    harness.manager.stop().await;
}

#[tokio::test]
async fn malformed_messages_get_the_peer_banned() {
    let mut harness = harness(false);
    let peer_id = peer();
    harness
        .network_event_tx
        .send(NetworkEvent::PeerConnected {
            peer_id,
            address: "127.0.0.1:1000".parse().unwrap(),
            outbound: false,
        })
        .await
        .unwrap();

    harness
        .network_event_tx
        .send(NetworkEvent::MessageReceived {
            peer_id,
            channel: ChannelId::Vote,
            data: vec![0xde, 0xad],
        })
        .await
        .unwrap();

    timeout(TEST_DEADLINE, async {
        loop {
            match harness.network_command_rx.recv().await.unwrap() {
                NetworkCommand::Ban { peer_id: banned } => {
                    assert_eq!(banned, peer_id);
                    return;
                }
                _ => continue,
            }
        }
    })
    .await
    .expect("peer was never banned");

    harness.manager.stop().await;
}

#[tokio::test]
async fn sync_switches_once_caught_up() {
    // a peer claiming height 0 means we are instantly caught up, which must
    // trigger the switch event after the first check interval
    let mut harness = harness(true);
    let peer_id = peer();
    harness
        .network_event_tx
        .send(NetworkEvent::PeerConnected {
            peer_id,
            address: "127.0.0.1:1000".parse().unwrap(),
            outbound: false,
        })
        .await
        .unwrap();
    let status = BlockSyncMessageSerializer::new()
        .serialize_to_vec(&BlockSyncMessage::StatusResponse { base: 0, height: 0 })
        .unwrap();
    harness
        .network_event_tx
        .send(NetworkEvent::MessageReceived {
            peer_id,
            channel: ChannelId::BlockSync,
            data: status,
        })
        .await
        .unwrap();

    let event = timeout(TEST_DEADLINE, harness.protocol_event_rx.recv())
        .await
        .expect("switch never happened")
        .expect("event channel closed");
    match event {
        ProtocolEvent::SwitchToConsensus { state } => {
            assert_eq!(state.last_block_height, harness.state.last_block_height);
        }
    }

    harness.manager.stop().await;
}

#[tokio::test]
async fn proposals_mark_peer_knowledge() {
    let mut harness = harness(false);
    let peer_id = peer();
    harness
        .network_event_tx
        .send(NetworkEvent::PeerConnected {
            peer_id,
            address: "127.0.0.1:1000".parse().unwrap(),
            outbound: false,
        })
        .await
        .unwrap();

    let keypair = KeyPair::generate();
    let mut proposal = corten_models::proposal::Proposal {
        height: 1,
        round: 0,
        pol_round: -1,
        block_id: BlockId {
            hash: Hash::compute_from(b"proposal"),
            part_set_header: PartSetHeader {
                total: 1,
                hash: Hash::compute_from(b"parts"),
            },
        },
        timestamp: Timestamp::from_millis(3),
        signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
    };
    proposal.sign("protocol-test", &keypair);
    let data = DataMessageSerializer::new()
        .serialize_to_vec(&DataMessage::Proposal(proposal.clone()))
        .unwrap();
    harness
        .network_event_tx
        .send(NetworkEvent::MessageReceived {
            peer_id,
            channel: ChannelId::Data,
            data,
        })
        .await
        .unwrap();

    let info = timeout(TEST_DEADLINE, harness.consensus_message_rx.recv())
        .await
        .expect("proposal never forwarded")
        .expect("consensus channel closed");
    assert!(matches!(info.msg, ConsensusMessage::Proposal(_)));

    harness.manager.stop().await;
}
