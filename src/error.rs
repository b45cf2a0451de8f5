//! Error taxonomy for the channel protocol.
//!
//! Every variant here corresponds to a category named in the protocol's
//! error handling design: protocol errors (envelope-level, recoverable),
//! command errors (semantic, non-protocol), business force-abort/async, and
//! internal consistency errors (fatal to the channel).

use thiserror::Error;

use crate::version::VersionId;

/// Envelope-level errors, surfaced to the peer and carried in a
/// [`Response`](crate::channel::Response)'s `error.code` field.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ProtocolError {
    /// The peer resent a request at a slot we already have a *different*
    /// stored request for. Indicates a peer bug; never silently overwritten.
    #[error("conflicting request at this sequence number")]
    Conflict,
    /// The peer sent a request it wasn't allowed to send (e.g. a client
    /// assigning `command_seq`).
    #[error("malformed request")]
    Malformed,
    /// We can't confirm this slot yet because we haven't sequenced far
    /// enough locally.
    #[error("not ready to process this command_seq yet")]
    Wait,
    /// The peer's request is for a future local sequence number; we're
    /// missing one or more predecessors.
    #[error("missing a predecessor request")]
    Missing,
}

impl ProtocolError {
    /// The wire string used in the `code` field of an error response.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::Malformed => "malformed",
            Self::Wait => "wait",
            Self::Missing => "missing",
        }
    }
}

/// Semantic failures of a command, recorded in the shared log as `fail` for
/// audit rather than rejected outright (unless sequencing was `strict`).
#[derive(Clone, Debug, Error)]
pub enum CommandError {
    #[error("command failed `check_command`: {0}")]
    CheckFailed(#[from] PaymentLogicError),
    #[error("dependency {version} is not live")]
    DependencyNotLive { version: VersionId },
    #[error("reference_id must start with `<origin>_`, got `{reference_id}`")]
    MalformedReferenceId { reference_id: String },
    #[error("business context rejected the command: {0}")]
    Business(#[from] crate::business::BusinessError),
    /// A command failure reported by the peer over the wire, whose concrete
    /// local variant we have no way to reconstruct from a bare code string.
    /// Used only on the confirming side of a response we didn't check
    /// ourselves (see `Channel::handle_response`).
    #[error("peer reported command failure: {code}")]
    Remote { code: String },
}

impl CommandError {
    /// The wire string used as `<command_code>` in an error response.
    pub fn code(&self) -> &str {
        match self {
            Self::CheckFailed(_) => "payment_logic_error",
            Self::DependencyNotLive { .. } => "dependency_not_live",
            Self::MalformedReferenceId { .. } => "malformed_reference_id",
            Self::Business(_) => "business_error",
            Self::Remote { code } => code.as_str(),
        }
    }
}

/// Errors raised by the payment status/field validation logic.
#[derive(Clone, Debug, Error)]
pub enum PaymentLogicError {
    #[error("wrong parties: expected {expected:?}, got {actual:?}")]
    WrongParties {
        expected: (String, String),
        actual: (String, String),
    },
    #[error("command originates from a party outside the channel")]
    WrongOrigin,
    #[error("sender set receiver status or vice-versa")]
    StatusSetOnWrongSide,
    #[error("invalid initial status pair ({sender:?}, {receiver:?})")]
    InvalidInitialStatus {
        sender: crate::status::Status,
        receiver: crate::status::Status,
    },
    #[error("invalid status transition: actor_is_sender={actor_is_sender} {old:?} -> {new:?}")]
    InvalidTransition {
        actor_is_sender: bool,
        old: crate::status::Status,
        new: crate::status::Status,
    },
    #[error("write-once field `{field}` was changed")]
    ImmutableFieldChanged { field: &'static str },
    #[error("cannot change counterparty-owned fields")]
    ForeignFieldChanged,
    #[error("internal consistency check failed while processing a payment")]
    InternalConsistency,
}

/// Errors from the [`Executor`](crate::executor::Executor).
#[derive(Clone, Debug, Error)]
pub enum ExecutorError {
    #[error("cannot sequence command: {0}")]
    CannotSequence(#[from] CommandError),
    #[error("dependency {version} is not live for this origin")]
    DependencyNotLive { version: VersionId },
    #[error(
        "out-of-order confirmation: expected seq_no {expected}, got {got}"
    )]
    OutOfOrderConfirmation { expected: u64, got: u64 },
    #[error("no such sequence number {seq_no}")]
    UnknownSequenceNumber { seq_no: u64 },
    #[error("command at seq_no {seq_no} was already confirmed")]
    DuplicateConfirmation { seq_no: u64 },
    #[error("get_object panicked while constructing version {version}")]
    ObjectConstruction { version: VersionId },
    #[error("missing dependency {version} in the object store at commit time")]
    MissingDependency { version: VersionId },
}

/// Internal-consistency errors: fatal to the channel, not to the process.
/// Recovery requires reloading from persisted state.
#[derive(Clone, Debug, Error)]
pub enum ChannelError {
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),
    #[error("protocol error from peer: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("two successes recorded for slot {seq_no}")]
    DoubleCommit { seq_no: u64 },
    #[error("response seq {seq} has no matching outstanding request")]
    UnknownResponse { seq: u64 },
    #[error("predecessor response has not yet been received")]
    OutOfOrderResponse,
    #[error(
        "peer's command_seq {got} exceeds our executor's next_seq {ours}"
    )]
    ImpossibleCommandSeq { got: u64, ours: u64 },
    #[error("transport error: {0}")]
    Transport(#[from] crate::channel::TransportError),
    #[error("persistence error: {0}")]
    Persist(anyhow::Error),
}
