//! `Status` and the rules that govern transitions of a `(sender, receiver)`
//! status pair.

use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-utils"))]
use proptest::prelude::*;

use crate::error::PaymentLogicError;

/// The status of one side (sender or receiver) of a payment.
///
/// Every status except `Abort` has an integer height used for the
/// per-side monotonicity rule; `Abort` compares as distinct and is governed
/// by the finality barrier instead of height ordering.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub enum Status {
    None,
    NeedsKycData,
    NeedsRecipientSignature,
    ReadyForSettlement,
    Settled,
    Abort,
}

impl Status {
    /// The height used for per-side monotonicity. `Abort` has no height;
    /// callers must special-case it (see [`is_valid_transition`]).
    pub(crate) fn height(self) -> Option<u8> {
        match self {
            Self::None => Some(0),
            Self::NeedsKycData => Some(1),
            Self::NeedsRecipientSignature => Some(1),
            Self::ReadyForSettlement => Some(2),
            Self::Settled => Some(3),
            Self::Abort => None,
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Settled | Self::Abort)
    }

    /// Whether this status is at or past the finality barrier
    /// (`ready_for_settlement` or beyond, excluding `abort` itself — an
    /// aborted side has already left the settlement path).
    pub fn is_past_finality_barrier(self) -> bool {
        matches!(self, Self::ReadyForSettlement | Self::Settled)
    }
}

/// A valid initial `(sender, receiver)` pair for a freshly proposed payment:
/// the actor proposing it sets their own status to `none`, and the other
/// side's status must also be `none`. A receiver may never be created in
/// `needs_recipient_signature`, and more generally nobody may be created
/// past `none`.
pub fn is_valid_initial(sender: Status, receiver: Status) -> bool {
    sender == Status::None && receiver == Status::None
}

/// Validates a proposed transition of `actor`'s own status from `old` to
/// `new`, given the *other* side's current status `other_current`.
///
/// Implements:
/// - per-side monotonicity by height, except for `abort`;
/// - `needs_recipient_signature` reachable only by the receiver;
/// - `settled` reachable only by the sender, and only once both sides are at
///   least `ready_for_settlement`;
/// - the finality barrier: once `actor` has reached `ready_for_settlement` or
///   beyond, they may not unilaterally abort unless `other_current` is
///   already `abort`.
pub fn is_valid_transition(
    actor_is_sender: bool,
    old: Status,
    other_current: Status,
    new: Status,
) -> Result<(), PaymentLogicError> {
    let err = || PaymentLogicError::InvalidTransition {
        actor_is_sender,
        old,
        new,
    };

    if new == old {
        // No-op transitions are always allowed (idempotent replays).
        return Ok(());
    }

    if new == Status::Abort {
        if old.is_past_finality_barrier() && other_current != Status::Abort {
            return Err(err());
        }
        return Ok(());
    }

    // Once aborted, an actor cannot leave abort on their own.
    if old == Status::Abort {
        return Err(err());
    }

    if new == Status::NeedsRecipientSignature && actor_is_sender {
        return Err(err());
    }
    if new == Status::Settled {
        if actor_is_sender {
            if !other_current.is_past_finality_barrier() {
                return Err(err());
            }
        } else {
            return Err(err());
        }
    }

    let old_height = old.height().expect("non-abort status always has a height");
    let new_height = new.height().ok_or_else(err)?;
    if new_height < old_height {
        return Err(err());
    }

    Ok(())
}
