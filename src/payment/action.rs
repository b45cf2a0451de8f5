//! `PaymentAction`: the write-once amount/currency/action/timestamp tuple.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(any(test, feature = "test-utils"))]
use proptest::prelude::*;

/// The write-once economic payload of a payment.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub struct PaymentAction {
    amount: u64,
    pub currency: String,
    pub action: String,
    pub timestamp: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("payment amount must be a positive integer, got {0}")]
pub struct NonPositiveAmount(u64);

impl PaymentAction {
    pub fn new(
        amount: u64,
        currency: impl Into<String>,
        action: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Result<Self, NonPositiveAmount> {
        if amount == 0 {
            return Err(NonPositiveAmount(amount));
        }
        Ok(Self {
            amount,
            currency: currency.into(),
            action: action.into(),
            timestamp: timestamp.into(),
        })
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_amount_rejected() {
        assert!(PaymentAction::new(0, "TIK", "charge", "now").is_err());
    }

    #[test]
    fn positive_amount_accepted() {
        let action = PaymentAction::new(10, "TIK", "charge", "now").unwrap();
        assert_eq!(action.amount(), 10);
    }
}
