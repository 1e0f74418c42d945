//! The consensus write-ahead log: every message the state machine observes
//! and every timeout it fires is appended before it takes effect, framed as
//! `CRC32 (4B BE) ∥ length (4B BE) ∥ payload`. On restart the log is
//! replayed from the last height marker to restore the exact round state.

use corten_consensus_exports::{
    ConsensusError, ConsensusMessage, ConsensusResult, MessageInfo, RoundStep,
};
use corten_models::part_set::{PartDeserializer, PartSerializer};
use corten_models::proposal::{ProposalDeserializer, ProposalSerializer};
use corten_models::vote::{VoteDeserializer, VoteSerializer};
use corten_models::{Height, Round};
use corten_serialization::{
    DeserializeError, Deserializer, I64VarIntDeserializer, I64VarIntSerializer, Serializer,
    U32VarIntDeserializer, U32VarIntSerializer, VecU8Deserializer, VecU8Serializer,
};
use corten_time::{Timestamp, TimestampDeserializer, TimestampSerializer};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::ops::Bound::Included;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Maximum payload size of one record.
pub const MAX_WAL_MSG_SIZE_BYTES: usize = 1024 * 1024;

/// A scheduled timeout, as observed by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutInfo {
    /// How long the timer ran.
    pub duration: Timestamp,
    /// Height the timeout belongs to.
    pub height: Height,
    /// Round the timeout belongs to.
    pub round: Round,
    /// Step the timeout was scheduled in.
    pub step: RoundStep,
}

/// One logged decision input.
#[derive(Debug, Clone)]
pub enum WalMessage {
    /// An inbound or internal consensus message.
    Message(MessageInfo),
    /// A fired timeout.
    Timeout(TimeoutInfo),
    /// Marker written after the given height was committed.
    EndHeight(Height),
}

/// A [`WalMessage`] with the wall-clock time it was observed.
#[derive(Debug, Clone)]
pub struct TimedWalMessage {
    /// Observation time.
    pub time: Timestamp,
    /// The logged input.
    pub msg: WalMessage,
}

const TAG_MESSAGE: u8 = 1;
const TAG_TIMEOUT: u8 = 2;
const TAG_END_HEIGHT: u8 = 3;

const MSG_TAG_PROPOSAL: u8 = 1;
const MSG_TAG_BLOCK_PART: u8 = 2;
const MSG_TAG_VOTE: u8 = 3;

fn step_to_u8(step: RoundStep) -> u8 {
    match step {
        RoundStep::NewHeight => 1,
        RoundStep::NewRound => 2,
        RoundStep::Propose => 3,
        RoundStep::Prevote => 4,
        RoundStep::PrevoteWait => 5,
        RoundStep::Precommit => 6,
        RoundStep::PrecommitWait => 7,
        RoundStep::Commit => 8,
    }
}

fn step_from_u8(raw: u8) -> Option<RoundStep> {
    Some(match raw {
        1 => RoundStep::NewHeight,
        2 => RoundStep::NewRound,
        3 => RoundStep::Propose,
        4 => RoundStep::Prevote,
        5 => RoundStep::PrevoteWait,
        6 => RoundStep::Precommit,
        7 => RoundStep::PrecommitWait,
        8 => RoundStep::Commit,
        _ => return None,
    })
}

fn encode_timed(msg: &TimedWalMessage) -> ConsensusResult<Vec<u8>> {
    let timestamp_serializer = TimestampSerializer::new();
    let i64_serializer = I64VarIntSerializer::new();
    let u32_serializer = U32VarIntSerializer::new();
    let bytes_serializer = VecU8Serializer::new();
    let mut payload = Vec::new();
    timestamp_serializer
        .serialize(&msg.time, &mut payload)
        .map_err(|err| ConsensusError::Wal(err.to_string()))?;
    match &msg.msg {
        WalMessage::Message(info) => {
            payload.push(TAG_MESSAGE);
            match &info.msg {
                ConsensusMessage::Proposal(proposal) => {
                    payload.push(MSG_TAG_PROPOSAL);
                    ProposalSerializer::new()
                        .serialize(proposal, &mut payload)
                        .map_err(|err| ConsensusError::Wal(err.to_string()))?;
                }
                ConsensusMessage::BlockPart {
                    height,
                    round,
                    part,
                } => {
                    payload.push(MSG_TAG_BLOCK_PART);
                    i64_serializer
                        .serialize(height, &mut payload)
                        .map_err(|err| ConsensusError::Wal(err.to_string()))?;
                    u32_serializer
                        .serialize(&(*round as u32), &mut payload)
                        .map_err(|err| ConsensusError::Wal(err.to_string()))?;
                    PartSerializer::new()
                        .serialize(part, &mut payload)
                        .map_err(|err| ConsensusError::Wal(err.to_string()))?;
                }
                ConsensusMessage::Vote(vote) => {
                    payload.push(MSG_TAG_VOTE);
                    VoteSerializer::new()
                        .serialize(vote, &mut payload)
                        .map_err(|err| ConsensusError::Wal(err.to_string()))?;
                }
            }
            let peer = info.peer_id.clone().unwrap_or_default();
            bytes_serializer
                .serialize(&peer.into_bytes(), &mut payload)
                .map_err(|err| ConsensusError::Wal(err.to_string()))?;
        }
        WalMessage::Timeout(timeout) => {
            payload.push(TAG_TIMEOUT);
            timestamp_serializer
                .serialize(&timeout.duration, &mut payload)
                .map_err(|err| ConsensusError::Wal(err.to_string()))?;
            i64_serializer
                .serialize(&timeout.height, &mut payload)
                .map_err(|err| ConsensusError::Wal(err.to_string()))?;
            u32_serializer
                .serialize(&(timeout.round as u32), &mut payload)
                .map_err(|err| ConsensusError::Wal(err.to_string()))?;
            payload.push(step_to_u8(timeout.step));
        }
        WalMessage::EndHeight(height) => {
            payload.push(TAG_END_HEIGHT);
            i64_serializer
                .serialize(height, &mut payload)
                .map_err(|err| ConsensusError::Wal(err.to_string()))?;
        }
    }
    Ok(payload)
}

fn decode_timed(payload: &[u8]) -> Option<TimedWalMessage> {
    let timestamp_deserializer = TimestampDeserializer::new();
    let i64_deserializer = I64VarIntDeserializer::new();
    let u32_deserializer = U32VarIntDeserializer::new(Included(0), Included(u32::MAX));
    let bytes_deserializer = VecU8Deserializer::new(256);

    let (rest, time) = timestamp_deserializer
        .deserialize::<DeserializeError>(payload)
        .ok()?;
    let (&tag, rest) = rest.split_first()?;
    let msg = match tag {
        TAG_MESSAGE => {
            let (&msg_tag, rest) = rest.split_first()?;
            let (rest, msg) = match msg_tag {
                MSG_TAG_PROPOSAL => {
                    let (rest, proposal) = ProposalDeserializer::new()
                        .deserialize::<DeserializeError>(rest)
                        .ok()?;
                    (rest, ConsensusMessage::Proposal(proposal))
                }
                MSG_TAG_BLOCK_PART => {
                    let (rest, height) = i64_deserializer
                        .deserialize::<DeserializeError>(rest)
                        .ok()?;
                    let (rest, round) = u32_deserializer
                        .deserialize::<DeserializeError>(rest)
                        .ok()?;
                    let (rest, part) = PartDeserializer::new()
                        .deserialize::<DeserializeError>(rest)
                        .ok()?;
                    (
                        rest,
                        ConsensusMessage::BlockPart {
                            height,
                            round: round as Round,
                            part,
                        },
                    )
                }
                MSG_TAG_VOTE => {
                    let (rest, vote) = VoteDeserializer::new()
                        .deserialize::<DeserializeError>(rest)
                        .ok()?;
                    (rest, ConsensusMessage::Vote(vote))
                }
                _ => return None,
            };
            let (_, peer_bytes) = bytes_deserializer
                .deserialize::<DeserializeError>(rest)
                .ok()?;
            let peer_id = if peer_bytes.is_empty() {
                None
            } else {
                Some(String::from_utf8(peer_bytes).ok()?)
            };
            WalMessage::Message(MessageInfo { msg, peer_id })
        }
        TAG_TIMEOUT => {
            let (rest, duration) = timestamp_deserializer
                .deserialize::<DeserializeError>(rest)
                .ok()?;
            let (rest, height) = i64_deserializer
                .deserialize::<DeserializeError>(rest)
                .ok()?;
            let (rest, round) = u32_deserializer
                .deserialize::<DeserializeError>(rest)
                .ok()?;
            let (&raw_step, _) = rest.split_first()?;
            WalMessage::Timeout(TimeoutInfo {
                duration,
                height,
                round: round as Round,
                step: step_from_u8(raw_step)?,
            })
        }
        TAG_END_HEIGHT => {
            let (_, height) = i64_deserializer
                .deserialize::<DeserializeError>(rest)
                .ok()?;
            WalMessage::EndHeight(height)
        }
        _ => return None,
    };
    Some(TimedWalMessage { time, msg })
}

/// Append-only consensus log. One writer; readers only during replay.
pub struct Wal {
    file: File,
    path: PathBuf,
}

impl Wal {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> ConsensusResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Wal {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Append one record.
    pub fn write(&mut self, msg: &TimedWalMessage) -> ConsensusResult<()> {
        let payload = encode_timed(msg)?;
        if payload.len() > MAX_WAL_MSG_SIZE_BYTES {
            return Err(ConsensusError::Wal(format!(
                "message of {} bytes exceeds the maximum of {}",
                payload.len(),
                MAX_WAL_MSG_SIZE_BYTES
            )));
        }
        let crc = crc32fast::hash(&payload);
        let mut record = Vec::with_capacity(payload.len() + 8);
        record.extend_from_slice(&crc.to_be_bytes());
        record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        record.extend_from_slice(&payload);
        self.file.write_all(&record)?;
        Ok(())
    }

    /// Append and fsync; used for records that must survive a crash, like
    /// height markers and own votes.
    pub fn write_sync(&mut self, msg: &TimedWalMessage) -> ConsensusResult<()> {
        self.write(msg)?;
        self.flush_and_sync()
    }

    /// Flush buffered records to disk.
    pub fn flush_and_sync(&mut self) -> ConsensusResult<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Read every intact record from the start of the log. Decoding stops at
    /// the first truncated or corrupt record, which a crash can legitimately
    /// leave behind.
    pub fn replay_all(&self) -> ConsensusResult<Vec<TimedWalMessage>> {
        let mut file = File::open(&self.path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut messages = Vec::new();
        let mut offset = 0usize;
        while offset + 8 <= data.len() {
            let crc = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap());
            let len =
                u32::from_be_bytes(data[offset + 4..offset + 8].try_into().unwrap()) as usize;
            if len > MAX_WAL_MSG_SIZE_BYTES || offset + 8 + len > data.len() {
                warn!("truncated record at offset {}, stopping replay", offset);
                break;
            }
            let payload = &data[offset + 8..offset + 8 + len];
            if crc32fast::hash(payload) != crc {
                warn!("corrupt record at offset {}, stopping replay", offset);
                break;
            }
            match decode_timed(payload) {
                Some(msg) => messages.push(msg),
                None => {
                    warn!("undecodable record at offset {}, stopping replay", offset);
                    break;
                }
            }
            offset += 8 + len;
        }
        debug!(records = messages.len(), "replayed write-ahead log");
        Ok(messages)
    }

    /// The records observed after the `EndHeight` marker of `height`; `None`
    /// when the marker is absent (the log does not cover that height).
    pub fn messages_after_end_height(
        &self,
        height: Height,
    ) -> ConsensusResult<Option<Vec<TimedWalMessage>>> {
        let all = self.replay_all()?;
        let marker = all
            .iter()
            .rposition(|entry| matches!(entry.msg, WalMessage::EndHeight(h) if h == height));
        Ok(marker.map(|position| all[position + 1..].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_models::block_id::BlockId;
    use corten_models::proposal::Proposal;
    use corten_signature::{Signature, SIGNATURE_SIZE_BYTES};

    fn sample_proposal() -> Proposal {
        Proposal {
            height: 4,
            round: 1,
            pol_round: -1,
            block_id: BlockId {
                hash: corten_hash::Hash::compute_from(b"wal"),
                part_set_header: corten_models::block_id::PartSetHeader {
                    total: 1,
                    hash: corten_hash::Hash::compute_from(b"wal"),
                },
            },
            timestamp: Timestamp::from_millis(9),
            signature: Signature::from_bytes(&[0u8; SIGNATURE_SIZE_BYTES]),
        }
    }

    fn timed(msg: WalMessage) -> TimedWalMessage {
        TimedWalMessage {
            time: Timestamp::from_millis(1_234),
            msg,
        }
    }

    #[test]
    fn write_and_replay_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.write(&timed(WalMessage::Message(MessageInfo {
            msg: ConsensusMessage::Proposal(sample_proposal()),
            peer_id: Some("peer-1".into()),
        })))
        .unwrap();
        wal.write(&timed(WalMessage::Timeout(TimeoutInfo {
            duration: Timestamp::from_millis(3_000),
            height: 4,
            round: 1,
            step: RoundStep::Propose,
        })))
        .unwrap();
        wal.write_sync(&timed(WalMessage::EndHeight(4))).unwrap();

        let replayed = wal.replay_all().unwrap();
        assert_eq!(replayed.len(), 3);
        match &replayed[0].msg {
            WalMessage::Message(info) => {
                assert_eq!(info.peer_id.as_deref(), Some("peer-1"));
                assert!(matches!(info.msg, ConsensusMessage::Proposal(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &replayed[1].msg {
            WalMessage::Timeout(timeout) => assert_eq!(timeout.step, RoundStep::Propose),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(replayed[2].msg, WalMessage::EndHeight(4)));
    }

    #[test]
    fn corruption_stops_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.write_sync(&timed(WalMessage::EndHeight(1))).unwrap();
        wal.write_sync(&timed(WalMessage::EndHeight(2))).unwrap();

        // flip a payload byte of the second record
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let wal = Wal::open(&path).unwrap();
        let replayed = wal.replay_all().unwrap();
        assert_eq!(replayed.len(), 1);
        assert!(matches!(replayed[0].msg, WalMessage::EndHeight(1)));
    }

    #[test]
    fn catchup_slice_after_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.write(&timed(WalMessage::EndHeight(1))).unwrap();
        wal.write(&timed(WalMessage::Timeout(TimeoutInfo {
            duration: Timestamp::from_millis(1_000),
            height: 2,
            round: 0,
            step: RoundStep::NewHeight,
        })))
        .unwrap();
        wal.flush_and_sync().unwrap();

        let after = wal.messages_after_end_height(1).unwrap().unwrap();
        assert_eq!(after.len(), 1);
        assert!(wal.messages_after_end_height(7).unwrap().is_none());
    }
}
