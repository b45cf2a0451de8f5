//! Core protocol for a two-party off-chain VASP payment channel.
//!
//! A [`Channel`](channel::Channel) sequences proposals from both sides of a
//! VASP pair into a single linear [`command`] log, driven forward by a
//! dependency-tracked [`executor`] and a business-policy-driven
//! [`processor`]. The HTTP transport, on-disk storage, and business policy
//! itself are external collaborators; this crate only defines the trait
//! boundaries ([`channel::ChannelTransport`], [`persist::ChannelPersister`],
//! [`business::BusinessContext`]) they plug into.

/// Opaque VASP addresses and the deterministic client/server role derived
/// from a pair of them.
pub mod address;
/// The [`business::BusinessContext`] capability consumed by the processor.
pub mod business;
/// [`Channel`](channel::Channel): the per-pair protocol state machine.
pub mod channel;
/// [`Command`](command::Command) and the [`CommandProcessor`] interface.
pub mod command;
/// Error taxonomy shared across the crate.
pub mod error;
/// [`Executor`](executor::Executor): dependency-tracked command sequencing.
pub mod executor;
/// [`VersionedObjectStore`](store::VersionedObjectStore).
pub mod store;
/// [`SharedObject`](version::SharedObject) and [`VersionId`](version::VersionId).
pub mod version;

/// [`PaymentObject`] and friends: the only [`version::SharedObject`] in the
/// core.
pub mod payment;
/// [`PaymentProcessor`](processor::PaymentProcessor): business-driven
/// evolution of payments, plus the crash-recoverable obligation log.
pub mod processor;
/// Durability boundary for channel state.
pub mod persist;
/// `Status` and the transition rules that govern it.
pub mod status;

pub use address::Address;
pub use channel::Channel;
pub use error::{ChannelError, CommandError, ExecutorError, ProtocolError};
pub use executor::Executor;
pub use payment::PaymentObject;
pub use processor::PaymentProcessor;
pub use status::Status;
pub use version::VersionId;
