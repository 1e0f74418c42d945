//! Dial bookkeeping: per-address failure counts with capped exponential
//! backoff, per-IP connection caps, and bans.

use corten_network_exports::{NetworkConfig, PeerId};
use corten_time::Timestamp;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Tracked state of one dialable address.
#[derive(Debug, Clone, Default)]
struct PeerInfo {
    consecutive_failures: u32,
    last_attempt: Option<Timestamp>,
    last_success: Option<Timestamp>,
    banned: bool,
}

/// Dial and ban state of every known address, plus per-IP accounting of the
/// live connections.
pub struct PeerInfoDatabase {
    config: NetworkConfig,
    peers: HashMap<SocketAddr, PeerInfo>,
    connections_per_ip: HashMap<IpAddr, usize>,
    banned_peers: HashSet<PeerId>,
    inbound_count: usize,
}

impl PeerInfoDatabase {
    /// Create the database seeded with the configured bootstrap peers.
    pub fn new(config: NetworkConfig) -> Self {
        let mut peers = HashMap::new();
        for address in &config.bootstrap_peers {
            peers.insert(*address, PeerInfo::default());
        }
        PeerInfoDatabase {
            config,
            peers,
            connections_per_ip: HashMap::new(),
            banned_peers: HashSet::new(),
            inbound_count: 0,
        }
    }

    /// Learn a dialable address.
    pub fn insert_address(&mut self, address: SocketAddr) {
        self.peers.entry(address).or_default();
    }

    /// The backoff delay currently required before redialing after
    /// `failures` consecutive failures.
    fn backoff(&self, failures: u32) -> Timestamp {
        if failures == 0 {
            return Timestamp::ZERO;
        }
        let shift = failures.min(16);
        let delay = self
            .config
            .backoff_base
            .as_millis()
            .saturating_mul(1u64 << shift);
        Timestamp::from_millis(delay.min(self.config.backoff_max.as_millis()))
    }

    /// Pick an address that is due for a dial attempt.
    pub fn out_connection_candidate(&self, now: Timestamp) -> Option<SocketAddr> {
        self.peers
            .iter()
            .filter(|(_, info)| !info.banned)
            .filter(|(_, info)| match info.last_attempt {
                None => true,
                Some(last) => {
                    now.saturating_sub(last) >= self.backoff(info.consecutive_failures)
                }
            })
            .map(|(address, _)| *address)
            .next()
    }

    /// Record a dial attempt.
    pub fn note_attempt(&mut self, address: SocketAddr, now: Timestamp) {
        self.peers.entry(address).or_default().last_attempt = Some(now);
    }

    /// Record a failed dial or handshake; grows the backoff.
    pub fn note_failure(&mut self, address: SocketAddr, now: Timestamp) {
        let info = self.peers.entry(address).or_default();
        info.consecutive_failures = info.consecutive_failures.saturating_add(1);
        info.last_attempt = Some(now);
        debug!(%address, failures = info.consecutive_failures, "dial failure");
    }

    /// Record a successful handshake; resets the backoff.
    pub fn note_success(&mut self, address: SocketAddr, now: Timestamp) {
        let info = self.peers.entry(address).or_default();
        info.consecutive_failures = 0;
        info.last_success = Some(now);
    }

    /// Check the per-IP and global inbound caps for a new inbound
    /// connection; on success the counts are taken.
    pub fn try_accept_inbound(&mut self, address: SocketAddr) -> bool {
        if self.inbound_count >= self.config.max_clients {
            return false;
        }
        let per_ip = self.connections_per_ip.entry(address.ip()).or_insert(0);
        if *per_ip >= self.config.max_nodes_per_host {
            return false;
        }
        *per_ip += 1;
        self.inbound_count += 1;
        true
    }

    /// Account an outbound connection against the per-IP cap.
    pub fn note_outbound_open(&mut self, address: SocketAddr) {
        *self.connections_per_ip.entry(address.ip()).or_insert(0) += 1;
    }

    /// Release the accounting of a closed connection.
    pub fn note_closed(&mut self, address: SocketAddr, inbound: bool) {
        if let Some(count) = self.connections_per_ip.get_mut(&address.ip()) {
            *count = count.saturating_sub(1);
        }
        if inbound {
            self.inbound_count = self.inbound_count.saturating_sub(1);
        }
    }

    /// Ban a peer identity.
    pub fn ban_peer(&mut self, peer_id: PeerId) {
        self.banned_peers.insert(peer_id);
    }

    /// True when `peer_id` is banned.
    pub fn is_banned(&self, peer_id: &PeerId) -> bool {
        self.banned_peers.contains(peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_signature::KeyPair;

    fn config() -> NetworkConfig {
        NetworkConfig {
            bootstrap_peers: vec!["10.0.0.1:26656".parse().unwrap()],
            backoff_base: Timestamp::from_millis(100),
            backoff_max: Timestamp::from_millis(1_000),
            max_clients: 2,
            max_nodes_per_host: 1,
            ..Default::default()
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut db = PeerInfoDatabase::new(config());
        let address: SocketAddr = "10.0.0.1:26656".parse().unwrap();
        let t0 = Timestamp::from_millis(10_000);

        assert_eq!(db.out_connection_candidate(t0), Some(address));
        db.note_failure(address, t0);
        // 200ms backoff after one failure
        assert_eq!(db.out_connection_candidate(t0.saturating_add(100.into())), None);
        assert_eq!(
            db.out_connection_candidate(t0.saturating_add(200.into())),
            Some(address)
        );

        // failures keep doubling until the cap
        for _ in 0..10 {
            db.note_failure(address, t0);
        }
        assert_eq!(db.out_connection_candidate(t0.saturating_add(999.into())), None);
        assert_eq!(
            db.out_connection_candidate(t0.saturating_add(1_000.into())),
            Some(address)
        );

        // success resets
        db.note_success(address, t0);
        db.note_attempt(address, t0);
        assert_eq!(db.out_connection_candidate(t0), Some(address));
    }

    #[test]
    fn inbound_caps() {
        let mut db = PeerInfoDatabase::new(config());
        let a: SocketAddr = "10.1.1.1:1000".parse().unwrap();
        let a2: SocketAddr = "10.1.1.1:1001".parse().unwrap();
        let b: SocketAddr = "10.2.2.2:1000".parse().unwrap();
        let c: SocketAddr = "10.3.3.3:1000".parse().unwrap();

        assert!(db.try_accept_inbound(a));
        // same host over the per-host cap
        assert!(!db.try_accept_inbound(a2));
        assert!(db.try_accept_inbound(b));
        // global cap of 2 reached
        assert!(!db.try_accept_inbound(c));

        db.note_closed(a, true);
        assert!(db.try_accept_inbound(c));
    }

    #[test]
    fn bans_are_by_identity() {
        let mut db = PeerInfoDatabase::new(config());
        let peer = PeerId::new(KeyPair::generate().get_public_key());
        assert!(!db.is_banned(&peer));
        db.ban_peer(peer);
        assert!(db.is_banned(&peer));
    }
}
