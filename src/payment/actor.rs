//! `PaymentActor`: one side (sender or receiver) of a payment.

use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-utils"))]
use proptest::prelude::*;

use crate::address::Address;
use crate::status::Status;

/// KYC data, signature, and certificate attached to an actor. All three
/// fields are set together or not at all.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub struct Kyc {
    pub kyc_data: String,
    pub kyc_signature: String,
    pub kyc_certificate: String,
}

/// One side of a [`super::PaymentObject`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub struct PaymentActor {
    pub address: Address,
    pub subaddress: String,
    pub kyc: Option<Kyc>,
    pub status: Status,
    pub metadata: Vec<String>,
}

impl PaymentActor {
    /// A fresh actor in the initial `none` status, with no KYC data yet.
    pub fn new(address: Address, subaddress: impl Into<String>) -> Self {
        Self {
            address,
            subaddress: subaddress.into(),
            kyc: None,
            status: Status::None,
            metadata: Vec::new(),
        }
    }

    /// Whether `address`/`subaddress` — the write-once identity fields — are
    /// the same between `self` and `other`.
    pub fn identity_eq(&self, other: &Self) -> bool {
        self.address == other.address && self.subaddress == other.subaddress
    }

    /// Whether `other`'s KYC field is a valid evolution of `self`'s: KYC may
    /// be attached once (`None -> Some`) but never changed or retracted
    /// afterwards.
    pub fn kyc_evolution_is_valid(&self, other: &Self) -> bool {
        match (&self.kyc, &other.kyc) {
            (None, _) => true,
            (Some(a), Some(b)) => a == b,
            (Some(_), None) => false,
        }
    }
}
