//! The block pool: scheduling of in-flight block requests against peer
//! ranges, buffering of received blocks, and strictly height-ordered
//! hand-off to the executor.

use corten_models::block::Block;
use corten_models::Height;
use corten_network_exports::PeerId;
use corten_protocol_exports::ProtocolConfig;
use corten_time::Timestamp;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Advertised range of one syncing peer.
#[derive(Debug, Clone, Copy)]
struct PeerSyncInfo {
    base: Height,
    height: Height,
    pending: usize,
}

/// One height's request lifecycle.
#[derive(Debug)]
struct Requester {
    peer: PeerId,
    sent_at: Timestamp,
    block: Option<Block>,
    /// Peers that failed or timed out for this height; not asked again.
    excluded: Vec<PeerId>,
}

/// Bookkeeping of the catch-up download: which heights are requested from
/// which peers, which blocks have arrived, and which height is next to be
/// applied.
pub struct BlockPool {
    config: ProtocolConfig,
    /// Next height to hand to the executor.
    apply_height: Height,
    /// Next height not yet requested.
    request_height: Height,
    peers: HashMap<PeerId, PeerSyncInfo>,
    requests: BTreeMap<Height, Requester>,
}

impl BlockPool {
    /// Start a pool applying from `start_height`.
    pub fn new(config: ProtocolConfig, start_height: Height) -> Self {
        BlockPool {
            config,
            apply_height: start_height,
            request_height: start_height,
            peers: HashMap::new(),
            requests: BTreeMap::new(),
        }
    }

    /// Next height the executor is waiting for.
    pub fn apply_height(&self) -> Height {
        self.apply_height
    }

    /// Record a peer's advertised range.
    pub fn set_peer_range(&mut self, peer: PeerId, base: Height, height: Height) {
        let info = self.peers.entry(peer).or_insert(PeerSyncInfo {
            base,
            height,
            pending: 0,
        });
        info.base = base;
        info.height = height;
    }

    /// Forget a peer, re-queueing its in-flight requests.
    pub fn remove_peer(&mut self, peer: &PeerId) {
        self.peers.remove(peer);
        for requester in self.requests.values_mut() {
            if requester.peer == *peer && requester.block.is_none() {
                requester.excluded.push(*peer);
                requester.sent_at = Timestamp::ZERO;
            }
        }
    }

    /// Highest height any peer advertises.
    pub fn max_peer_height(&self) -> Height {
        self.peers.values().map(|info| info.height).max().unwrap_or(0)
    }

    /// Number of tracked peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn candidate_peer(&self, height: Height, excluded: &[PeerId]) -> Option<PeerId> {
        self.peers
            .iter()
            .filter(|(peer, info)| {
                info.base <= height
                    && info.height >= height
                    && info.pending < self.config.max_pending_per_peer
                    && !excluded.contains(peer)
            })
            .map(|(peer, _)| *peer)
            .next()
    }

    /// Pick new requests: every unrequested height within the window and
    /// under the peer caps, plus re-dispatches of reset requests.
    pub fn schedule(&mut self, now: Timestamp) -> Vec<(PeerId, Height)> {
        let mut dispatched = Vec::new();

        // re-dispatch reset requesters first
        let reset_heights: Vec<Height> = self
            .requests
            .iter()
            .filter(|(_, requester)| {
                requester.block.is_none() && requester.sent_at == Timestamp::ZERO
            })
            .map(|(height, _)| *height)
            .collect();
        for height in reset_heights {
            let excluded = self.requests[&height].excluded.clone();
            if let Some(peer) = self.candidate_peer(height, &excluded) {
                if let Some(requester) = self.requests.get_mut(&height) {
                    requester.peer = peer;
                    requester.sent_at = now;
                }
                if let Some(info) = self.peers.get_mut(&peer) {
                    info.pending += 1;
                }
                dispatched.push((peer, height));
            }
        }

        // fresh heights within the window
        let window_end = self
            .apply_height
            .saturating_add(self.config.request_window)
            .min(self.max_peer_height());
        while self.request_height <= window_end {
            let height = self.request_height;
            match self.candidate_peer(height, &[]) {
                Some(peer) => {
                    self.requests.insert(
                        height,
                        Requester {
                            peer,
                            sent_at: now,
                            block: None,
                            excluded: Vec::new(),
                        },
                    );
                    if let Some(info) = self.peers.get_mut(&peer) {
                        info.pending += 1;
                    }
                    dispatched.push((peer, height));
                    self.request_height += 1;
                }
                None => break,
            }
        }
        dispatched
    }

    /// Store a received block. Unsolicited blocks and blocks from the wrong
    /// peer are rejected.
    pub fn add_block(&mut self, peer: PeerId, block: Block) -> Result<(), String> {
        let height = block.header.height;
        let requester = self
            .requests
            .get_mut(&height)
            .ok_or_else(|| format!("unsolicited block at height {}", height))?;
        if requester.peer != peer {
            return Err(format!(
                "block {} from {} but requested from {}",
                height, peer, requester.peer
            ));
        }
        if requester.block.is_some() {
            return Err(format!("duplicate block at height {}", height));
        }
        requester.block = Some(block);
        if let Some(info) = self.peers.get_mut(&peer) {
            info.pending = info.pending.saturating_sub(1);
        }
        Ok(())
    }

    /// The peer cannot serve the height: exclude it and reset the request.
    pub fn on_no_block(&mut self, peer: PeerId, height: Height) {
        if let Some(requester) = self.requests.get_mut(&height) {
            if requester.peer == peer && requester.block.is_none() {
                requester.excluded.push(peer);
                requester.sent_at = Timestamp::ZERO;
                if let Some(info) = self.peers.get_mut(&peer) {
                    info.pending = info.pending.saturating_sub(1);
                }
            }
        }
    }

    /// Reset requests whose deadline lapsed, excluding the slow peer.
    pub fn expire_requests(&mut self, now: Timestamp) -> Vec<(PeerId, Height)> {
        let mut expired = Vec::new();
        for (height, requester) in self.requests.iter_mut() {
            if requester.block.is_none()
                && requester.sent_at != Timestamp::ZERO
                && now.saturating_sub(requester.sent_at) >= self.config.sync_timeout
            {
                expired.push((requester.peer, *height));
                requester.excluded.push(requester.peer);
                requester.sent_at = Timestamp::ZERO;
            }
        }
        for (peer, height) in &expired {
            debug!(%peer, height, "block request timed out");
            if let Some(info) = self.peers.get_mut(peer) {
                info.pending = info.pending.saturating_sub(1);
            }
        }
        expired
    }

    /// The buffered block at the apply height, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<(PeerId, Block)> {
        let requester = self.requests.get(&self.apply_height)?;
        requester.block.as_ref()?;
        let requester = self
            .requests
            .remove(&self.apply_height)
            .expect("checked above");
        let block = requester.block.expect("checked above");
        self.apply_height += 1;
        Some((requester.peer, block))
    }

    /// Put a block back after a failed apply and penalize its sender.
    pub fn reject_applied(&mut self, peer: PeerId, height: Height) {
        self.apply_height = self.apply_height.min(height);
        self.requests.insert(
            height,
            Requester {
                peer,
                sent_at: Timestamp::ZERO,
                block: None,
                excluded: vec![peer],
            },
        );
        self.remove_peer(&peer);
    }

    /// True once every peer is within the switch threshold.
    pub fn caught_up(&self) -> bool {
        !self.peers.is_empty()
            && self.max_peer_height() - (self.apply_height - 1) <= self.config.switch_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_hash::Hash;
    use corten_models::address::Address;
    use corten_models::block::{BlockHeader, Data, Version};
    use corten_models::block_id::BlockId;
    use corten_models::evidence::EvidenceList;
    use corten_models::vote::Commit;
    use corten_signature::KeyPair;

    fn peer() -> PeerId {
        PeerId::new(KeyPair::generate().get_public_key())
    }

    fn block_at(height: Height) -> Block {
        let data = Data { txs: vec![] };
        let evidence = EvidenceList::default();
        let last_commit = Commit::empty();
        Block {
            header: BlockHeader {
                version: Version { block: 11, app: 0 },
                chain_id: "pool-test".into(),
                height,
                time: Timestamp::from_millis(height as u64),
                last_block_id: BlockId::ZERO,
                last_commit_hash: last_commit.hash(),
                data_hash: data.hash(),
                validators_hash: Hash::ZERO,
                next_validators_hash: Hash::ZERO,
                consensus_hash: Hash::ZERO,
                app_hash: vec![],
                last_results_hash: Hash::ZERO,
                evidence_hash: evidence.hash(),
                proposer_address: Address::from_bytes(&[0u8; 20]),
            },
            data,
            evidence,
            last_commit,
        }
    }

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            max_pending_per_peer: 2,
            request_window: 8,
            sync_timeout: Timestamp::from_millis(1_000),
            ..Default::default()
        }
    }

    #[test]
    fn schedules_within_peer_caps() {
        let mut pool = BlockPool::new(config(), 1);
        let peer_a = peer();
        pool.set_peer_range(peer_a, 1, 10);
        let now = Timestamp::from_millis(1_000);

        // one peer, two pending max
        let dispatched = pool.schedule(now);
        assert_eq!(dispatched.len(), 2);
        assert!(dispatched.iter().all(|(p, _)| *p == peer_a));

        // a second peer opens two more slots
        let peer_b = peer();
        pool.set_peer_range(peer_b, 1, 10);
        let dispatched = pool.schedule(now);
        assert_eq!(dispatched.len(), 2);
        assert!(dispatched.iter().all(|(p, _)| *p == peer_b));
    }

    #[test]
    fn ordered_pop_and_advance() {
        let mut pool = BlockPool::new(config(), 1);
        let peer_a = peer();
        pool.set_peer_range(peer_a, 1, 3);
        let now = Timestamp::from_millis(1_000);
        let dispatched = pool.schedule(now);
        assert_eq!(dispatched.len(), 2);

        // height 2 arrives first: nothing ready yet
        pool.add_block(peer_a, block_at(2)).unwrap();
        assert!(pool.pop_ready().is_none());

        pool.add_block(peer_a, block_at(1)).unwrap();
        let (_, block) = pool.pop_ready().unwrap();
        assert_eq!(block.header.height, 1);
        let (_, block) = pool.pop_ready().unwrap();
        assert_eq!(block.header.height, 2);
        assert!(pool.pop_ready().is_none());
        assert_eq!(pool.apply_height(), 3);
    }

    #[test]
    fn unsolicited_blocks_rejected() {
        let mut pool = BlockPool::new(config(), 1);
        let peer_a = peer();
        let peer_b = peer();
        pool.set_peer_range(peer_a, 1, 5);
        pool.schedule(Timestamp::from_millis(1_000));

        // block from the wrong peer
        assert!(pool.add_block(peer_b, block_at(1)).is_err());
        // block nobody asked for
        assert!(pool.add_block(peer_a, block_at(9)).is_err());
    }

    #[test]
    fn timeout_excludes_peer_and_redispatches() {
        let mut pool = BlockPool::new(config(), 1);
        let slow = peer();
        pool.set_peer_range(slow, 1, 5);
        let t0 = Timestamp::from_millis(1_000);
        let dispatched = pool.schedule(t0);
        let first_height = dispatched[0].1;

        // deadline passes; the slow peer is excluded for those heights
        let expired = pool.expire_requests(t0.saturating_add(1_000.into()));
        assert!(!expired.is_empty());

        // the timed-out heights cannot go back to the slow peer; only fresh
        // heights can be dispatched to it
        let dispatched = pool.schedule(t0.saturating_add(1_100.into()));
        assert!(dispatched.iter().all(|(_, height)| *height > first_height + 1));

        // a fresh peer picks the request up
        let fresh = peer();
        pool.set_peer_range(fresh, 1, 5);
        let redispatched = pool.schedule(t0.saturating_add(1_200.into()));
        assert!(redispatched
            .iter()
            .any(|(p, h)| *p == fresh && *h == first_height));
    }

    #[test]
    fn caught_up_condition() {
        let mut pool = BlockPool::new(config(), 5);
        assert!(!pool.caught_up());
        let peer_a = peer();
        pool.set_peer_range(peer_a, 1, 5);
        // applying next is 5, peer max is 5: within threshold 1
        assert!(pool.caught_up());
        pool.set_peer_range(peer_a, 1, 50);
        assert!(!pool.caught_up());
    }
}
