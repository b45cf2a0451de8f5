//! Durability boundary for a channel.
//!
//! This crate does not choose an on-disk format or a storage engine — that's
//! a host-process concern (see Non-goals). [`ChannelPersister`] is the trait
//! boundary a host implements so that after a crash and reload, a
//! [`crate::channel::Channel`] can be reconstructed into exactly the state it
//! was in before the crash, including any request/response slot whose
//! outcome had not yet been confirmed.

use async_trait::async_trait;

use crate::address::Address;
use crate::channel::ChannelSnapshot;

/// Persists and restores one channel's request/response bookkeeping: the
/// only state that can't be re-derived by replaying confirmed commands
/// through a fresh executor.
///
/// A [`ChannelSnapshot`] captures this side's outstanding and completed
/// request/response slots, written atomically before a response or a
/// locally-sequenced command is ever acted on beyond this process.
/// [`crate::channel::Channel::restore`] rebuilds the executor and object
/// store from the snapshot's confirmed commands rather than this trait
/// persisting them directly.
#[async_trait]
pub trait ChannelPersister: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn save(
        &self,
        myself: &Address,
        other: &Address,
        snapshot: &ChannelSnapshot,
    ) -> Result<(), Self::Error>;

    async fn load(
        &self,
        myself: &Address,
        other: &Address,
    ) -> Result<Option<ChannelSnapshot>, Self::Error>;
}
