//! Wire format for the election protocol.
//!
//! Every field occupies one slot holding an ASCII digit, so a frame is two or
//! three bytes long and its length is known once the type (and, for
//! heartbeats, the kind) slot has been read. There are no length prefixes or
//! checksums.

use std::collections::HashMap;

use super::{NodeId, RaftError};

const VOTE_REQUEST: u8 = 0;
const VOTE_RESPONSE: u8 = 1;
const HEARTBEAT: u8 = 2;
const HEARTBEAT_RESPONSE: u8 = 3;

const GRANTED: u8 = 0;
const DENIED: u8 = 1;

const NORMAL: u8 = 0;
const PROPOSAL: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteStatus {
    Granted,
    Denied,
}

impl VoteStatus {
    pub fn is_granted(self) -> bool {
        matches!(self, VoteStatus::Granted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatKind {
    Normal,
    Proposal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftMessage {
    VoteRequest {
        candidate_id: NodeId,
    },
    VoteResponse {
        status: VoteStatus,
    },
    /// A normal heartbeat carries no value; a proposal carries the leader id.
    Heartbeat {
        proposed_value: Option<NodeId>,
    },
    HeartbeatResponse {
        kind: HeartbeatKind,
        status: VoteStatus,
    },
}

impl RaftMessage {
    pub fn normal_heartbeat() -> Self {
        RaftMessage::Heartbeat {
            proposed_value: None,
        }
    }

    pub fn proposal(value: NodeId) -> Self {
        RaftMessage::Heartbeat {
            proposed_value: Some(value),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let slots: Vec<u8> = match *self {
            RaftMessage::VoteRequest { candidate_id } => vec![VOTE_REQUEST, candidate_id],
            RaftMessage::VoteResponse { status } => vec![VOTE_RESPONSE, status_slot(status)],
            RaftMessage::Heartbeat {
                proposed_value: None,
            } => vec![HEARTBEAT, NORMAL],
            RaftMessage::Heartbeat {
                proposed_value: Some(value),
            } => vec![HEARTBEAT, PROPOSAL, value],
            RaftMessage::HeartbeatResponse { kind, status } => {
                vec![HEARTBEAT_RESPONSE, kind_slot(kind), status_slot(status)]
            }
        };

        slots.into_iter().map(to_digit).collect()
    }

    /// Decodes one message from the front of `bytes`.
    ///
    /// Returns `Ok(None)` when `bytes` is a valid but incomplete prefix, and
    /// the decoded message together with the number of bytes consumed
    /// otherwise.
    pub fn decode(bytes: &[u8]) -> Result<Option<(RaftMessage, usize)>, RaftError> {
        let Some(&first) = bytes.first() else {
            return Ok(None);
        };

        let message = match from_digit(first)? {
            VOTE_REQUEST => match bytes.get(1) {
                Some(&b) => (
                    RaftMessage::VoteRequest {
                        candidate_id: from_digit(b)?,
                    },
                    2,
                ),
                None => return Ok(None),
            },
            VOTE_RESPONSE => match bytes.get(1) {
                Some(&b) => (
                    RaftMessage::VoteResponse {
                        status: parse_status(b)?,
                    },
                    2,
                ),
                None => return Ok(None),
            },
            HEARTBEAT => match bytes.get(1) {
                Some(&b) => match parse_kind(b)? {
                    HeartbeatKind::Normal => (RaftMessage::normal_heartbeat(), 2),
                    HeartbeatKind::Proposal => match bytes.get(2) {
                        Some(&v) => (RaftMessage::proposal(from_digit(v)?), 3),
                        None => return Ok(None),
                    },
                },
                None => return Ok(None),
            },
            HEARTBEAT_RESPONSE => match (bytes.get(1), bytes.get(2)) {
                (Some(&k), Some(&s)) => (
                    RaftMessage::HeartbeatResponse {
                        kind: parse_kind(k)?,
                        status: parse_status(s)?,
                    },
                    3,
                ),
                (Some(&k), None) => {
                    parse_kind(k)?;
                    return Ok(None);
                }
                _ => return Ok(None),
            },
            other => {
                return Err(RaftError::MalformedMessage(format!(
                    "unrecognized message type {other}"
                )))
            }
        };

        Ok(Some(message))
    }
}

/// Slots hold a single digit; node ids above 9 are rejected by
/// `RaftConfig::validate` before a node can send anything.
fn to_digit(slot: u8) -> u8 {
    debug_assert!(slot <= 9, "slot value {slot} does not fit in one digit");
    b'0'.wrapping_add(slot)
}

fn from_digit(byte: u8) -> Result<u8, RaftError> {
    if byte.is_ascii_digit() {
        Ok(byte - b'0')
    } else {
        Err(RaftError::MalformedMessage(format!(
            "slot byte {byte:#04x} is not a digit"
        )))
    }
}

fn status_slot(status: VoteStatus) -> u8 {
    match status {
        VoteStatus::Granted => GRANTED,
        VoteStatus::Denied => DENIED,
    }
}

fn kind_slot(kind: HeartbeatKind) -> u8 {
    match kind {
        HeartbeatKind::Normal => NORMAL,
        HeartbeatKind::Proposal => PROPOSAL,
    }
}

fn parse_status(byte: u8) -> Result<VoteStatus, RaftError> {
    match from_digit(byte)? {
        GRANTED => Ok(VoteStatus::Granted),
        DENIED => Ok(VoteStatus::Denied),
        other => Err(RaftError::MalformedMessage(format!(
            "unknown status {other}"
        ))),
    }
}

fn parse_kind(byte: u8) -> Result<HeartbeatKind, RaftError> {
    match from_digit(byte)? {
        NORMAL => Ok(HeartbeatKind::Normal),
        PROPOSAL => Ok(HeartbeatKind::Proposal),
        other => Err(RaftError::MalformedMessage(format!(
            "unknown heartbeat kind {other}"
        ))),
    }
}

/// Per-sender reassembly of fragmented payloads.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: HashMap<NodeId, Vec<u8>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` to whatever `from` left incomplete and drains every
    /// complete message.
    ///
    /// Decoding stops at the first malformed frame: the messages in front of
    /// it are returned along with the error, and everything from the bad frame
    /// on is dropped together with the sender's buffer.
    pub fn push(&mut self, from: NodeId, bytes: &[u8]) -> (Vec<RaftMessage>, Option<RaftError>) {
        let buffer = self.pending.entry(from).or_default();
        buffer.extend_from_slice(bytes);

        let mut messages = Vec::new();
        let mut offset = 0;
        loop {
            match RaftMessage::decode(&buffer[offset..]) {
                Ok(Some((message, used))) => {
                    messages.push(message);
                    offset += used;
                }
                Ok(None) => break,
                Err(e) => {
                    self.pending.remove(&from);
                    return (messages, Some(e));
                }
            }
        }

        buffer.drain(..offset);
        if buffer.is_empty() {
            self.pending.remove(&from);
        }

        (messages, None)
    }

    /// Bytes held back for `from` while waiting for the rest of a frame.
    pub fn pending_len(&self, from: NodeId) -> usize {
        self.pending.get(&from).map_or(0, Vec::len)
    }
}
