//! Wire envelopes exchanged between two channels.
//!
//! Field names and optionality are stable across encodings so a host can choose
//! any encoding without this crate caring; `serde::{Serialize, Deserialize}`
//! derives make JSON the default but impose nothing.

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, ProtocolError};
use crate::payment::PaymentCommand;

/// A proposed command at a given local sequence number. The server fills in
/// `command_seq`; a client must leave it `None`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: u64,
    pub command_seq: Option<u64>,
    pub command: PaymentCommand,
}

/// The reply to a [`Request`], carrying the shared-sequence slot the
/// command landed in and, on failure, which kind.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub seq: u64,
    pub command_seq: Option<u64>,
    pub status: ResponseStatus,
    pub error: Option<ResponseError>,
    /// Populated only for a `conflict` protocol error: the command already
    /// on file at this slot, so the peer can diagnose why its retransmit
    /// was rejected instead of silently losing the proposal.
    pub conflicting_command: Option<PaymentCommand>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// `code` is `"conflict" | "malformed" | "wait" | "missing"` for a protocol
/// error, or the command's own error code (e.g. `"payment_logic_error"`)
/// when `protocol_error` is `false`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub protocol_error: bool,
    pub code: String,
}

impl Response {
    pub fn success(seq: u64, command_seq: u64) -> Self {
        Self {
            seq,
            command_seq: Some(command_seq),
            status: ResponseStatus::Success,
            error: None,
            conflicting_command: None,
        }
    }

    pub fn command_failed(seq: u64, command_seq: u64, error: &CommandError) -> Self {
        Self {
            seq,
            command_seq: Some(command_seq),
            status: ResponseStatus::Failure,
            error: Some(ResponseError {
                protocol_error: false,
                code: error.code().to_string(),
            }),
            conflicting_command: None,
        }
    }

    pub fn protocol_error(seq: u64, error: ProtocolError) -> Self {
        Self {
            seq,
            command_seq: None,
            status: ResponseStatus::Failure,
            error: Some(ResponseError {
                protocol_error: true,
                code: error.code().to_string(),
            }),
            conflicting_command: None,
        }
    }

    /// A `conflict` protocol error, carrying the command already stored at
    /// this slot so the peer can inspect what it collided with.
    pub fn conflict(seq: u64, previous: PaymentCommand) -> Self {
        Self {
            seq,
            command_seq: None,
            status: ResponseStatus::Failure,
            error: Some(ResponseError {
                protocol_error: true,
                code: ProtocolError::Conflict.code().to_string(),
            }),
            conflicting_command: Some(previous),
        }
    }

    /// Whether this response reports a protocol-level error with the given
    /// code (used by [`super::Channel::handle_response`] to dispatch).
    pub fn protocol_error_code(&self) -> Option<&str> {
        match &self.error {
            Some(e) if e.protocol_error => Some(e.code.as_str()),
            _ => None,
        }
    }
}

impl Request {
    /// Whether this request proposes the exact same command as `other` —
    /// used to distinguish a benign retransmit from a conflicting reuse of
    /// the same `seq`.
    pub fn is_retransmit_of(&self, other: &Request) -> bool {
        self.seq == other.seq && self.command == other.command
    }
}
