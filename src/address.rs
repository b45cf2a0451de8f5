//! Opaque VASP addresses and deterministic role assignment.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-utils"))]
use proptest::prelude::*;

/// An opaque, totally ordered, hashable identifier for one VASP.
///
/// The upstream split between an on-chain "parent" address and a payment
/// subaddress is external to this crate (it's encoded by the host process
/// before a [`crate::payment::PaymentActor`] is ever constructed); `Address`
/// only exposes what role assignment and equality need: a stable
/// total order and a `last_bit`.
#[derive(
    Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub struct Address(
    #[cfg_attr(
        any(test, feature = "test-utils"),
        proptest(strategy = "any::<[u8; 16]>().prop_map(|b| b.to_vec())")
    )]
    Vec<u8>,
);

impl Address {
    /// Wraps raw bytes as an address. Does not validate any particular
    /// encoding; that's an external (host) concern.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw bytes of this address.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The least-significant bit of the address's last byte.
    ///
    /// Used only for role assignment; has no bearing on address validity.
    pub fn last_bit(&self) -> u8 {
        match self.0.last() {
            Some(byte) => byte & 1,
            None => 0,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

/// The role a VASP plays in a given channel. Deterministic and stable: for
/// any unordered pair of addresses, exactly one side is [`Role::Client`] and
/// the other is [`Role::Server`].
///
/// The server's role is to assign the shared-sequence index (`command_seq`)
/// to each command it sequences — the tie-breaker that makes the protocol
/// deterministic with two proposers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_client(self) -> bool {
        matches!(self, Self::Client)
    }

    pub fn is_server(self) -> bool {
        matches!(self, Self::Server)
    }
}

/// Computes whether `myself` is the client in a channel with `other`.
///
/// `bit = last_bit(myself) XOR last_bit(other)`. If `bit == 0`, the side
/// with the numerically-greater address is the client; if `bit == 1`, the
/// side with the numerically-smaller address is the client. This is
/// symmetric and stable: `is_client(a, b) XOR is_client(b, a)` is always
/// true.
pub fn role_of(myself: &Address, other: &Address) -> Role {
    let bit = myself.last_bit() ^ other.last_bit();
    let myself_is_client = match bit {
        0 => myself.cmp(other) != Ordering::Less,
        _ => myself.cmp(other) == Ordering::Less,
    };
    if myself_is_client { Role::Client } else { Role::Server }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn role_assignment_is_symmetric_and_exclusive() {
        proptest!(|(a in any::<Address>(), b in any::<Address>())| {
            prop_assume!(a != b);
            let a_role = role_of(&a, &b);
            let b_role = role_of(&b, &a);
            prop_assert_ne!(a_role, b_role);
        });
    }

    #[test]
    fn role_assignment_is_deterministic() {
        proptest!(|(a in any::<Address>(), b in any::<Address>())| {
            prop_assert_eq!(role_of(&a, &b), role_of(&a, &b));
        });
    }

    #[test]
    fn last_bit_is_stable_for_empty_address() {
        let addr = Address::new(Vec::new());
        assert_eq!(addr.last_bit(), 0);
    }
}
