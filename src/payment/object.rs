//! `PaymentObject`: the only `SharedObject` in the core.

use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-utils"))]
use proptest::prelude::*;

use crate::error::PaymentLogicError;
use crate::payment::action::PaymentAction;
use crate::payment::actor::PaymentActor;
use crate::status::{self, Status};
use crate::version::{SharedObject, VersionId};

/// A single version of a payment between a `sender` and a `receiver`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub struct PaymentObject {
    version: VersionId,
    previous_versions: Vec<VersionId>,

    pub sender: PaymentActor,
    pub receiver: PaymentActor,
    /// `<originator_address>_<suffix>`; never changes across versions.
    pub reference_id: String,
    pub original_payment_reference_id: String,
    pub description: Option<String>,
    pub action: PaymentAction,
    /// Set by the receiver once they've signed off on settlement details.
    pub recipient_signature: Option<String>,
}

impl SharedObject for PaymentObject {
    fn version(&self) -> VersionId {
        self.version
    }

    fn previous_versions(&self) -> &[VersionId] {
        &self.previous_versions
    }

    fn new_version(&self) -> Self {
        Self {
            version: VersionId::generate(),
            previous_versions: vec![self.version],
            ..self.clone()
        }
    }
}

impl PaymentObject {
    /// Constructs a brand-new root payment (no previous versions).
    pub fn new_root(
        sender: PaymentActor,
        receiver: PaymentActor,
        reference_id: impl Into<String>,
        original_payment_reference_id: impl Into<String>,
        action: PaymentAction,
    ) -> Self {
        Self {
            version: VersionId::generate(),
            previous_versions: Vec::new(),
            sender,
            receiver,
            reference_id: reference_id.into(),
            original_payment_reference_id: original_payment_reference_id
                .into(),
            description: None,
            action,
            recipient_signature: None,
        }
    }

    /// The actor on `role`'s side.
    pub fn actor(&self, is_sender: bool) -> &PaymentActor {
        if is_sender { &self.sender } else { &self.receiver }
    }

    pub fn actor_mut(&mut self, is_sender: bool) -> &mut PaymentActor {
        if is_sender {
            &mut self.sender
        } else {
            &mut self.receiver
        }
    }

    /// Validates a freshly-proposed root payment: the actor creating it
    /// must not have set either side's status past `none`.
    pub fn validate_fresh(&self) -> Result<(), PaymentLogicError> {
        if !status::is_valid_initial(self.sender.status, self.receiver.status)
        {
            return Err(PaymentLogicError::InvalidInitialStatus {
                sender: self.sender.status,
                receiver: self.receiver.status,
            });
        }
        Ok(())
    }

    /// Validates that `new` is a legal update of `self`, from the
    /// perspective of the local VASP playing `my_role_is_sender`.
    ///
    /// Checks, in order: write-once fields are unchanged; our own actor's
    /// mutable fields (status, metadata, KYC) were not touched by this
    /// update; the counterparty's KYC only ever grows monotonically; and
    /// the counterparty's status transition is legal.
    pub fn validate_update(
        &self,
        new: &PaymentObject,
        my_role_is_sender: bool,
    ) -> Result<(), PaymentLogicError> {
        if self.reference_id != new.reference_id
            || self.original_payment_reference_id
                != new.original_payment_reference_id
            || self.description != new.description
            || self.action != new.action
        {
            return Err(PaymentLogicError::ImmutableFieldChanged {
                field: "reference_id/original_payment_reference_id/description/action",
            });
        }
        if !self.sender.identity_eq(&new.sender)
            || !self.receiver.identity_eq(&new.receiver)
        {
            return Err(PaymentLogicError::ImmutableFieldChanged {
                field: "address/subaddress",
            });
        }
        if self.recipient_signature.is_some()
            && self.recipient_signature != new.recipient_signature
        {
            return Err(PaymentLogicError::ImmutableFieldChanged {
                field: "recipient_signature",
            });
        }

        let my_old = self.actor(my_role_is_sender);
        let my_new = new.actor(my_role_is_sender);
        if my_old != my_new {
            return Err(PaymentLogicError::ForeignFieldChanged);
        }

        let other_old = self.actor(!my_role_is_sender);
        let other_new = new.actor(!my_role_is_sender);
        if !other_old.kyc_evolution_is_valid(other_new) {
            return Err(PaymentLogicError::ImmutableFieldChanged {
                field: "kyc",
            });
        }

        status::is_valid_transition(
            !my_role_is_sender,
            other_old.status,
            my_old.status,
            other_new.status,
        )?;

        Ok(())
    }

    /// Whether `new` differs from `self` in any field the business layer
    /// could have changed (used to decide whether a follow-up command is
    /// needed after `payment_process_async`).
    pub fn has_changed_from(&self, new: &PaymentObject) -> bool {
        self.sender != new.sender || self.receiver != new.receiver
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::address::Address;

    fn fresh_pair() -> (PaymentActor, PaymentActor) {
        (
            PaymentActor::new(Address::from("vasp_a"), "sub_a"),
            PaymentActor::new(Address::from("vasp_b"), "sub_b"),
        )
    }

    #[test]
    fn fresh_payment_must_be_all_none() {
        let (sender, receiver) = fresh_pair();
        let action = PaymentAction::new(10, "TIK", "charge", "t").unwrap();
        let payment = PaymentObject::new_root(
            sender, receiver, "vasp_a_1", "vasp_a_1", action,
        );
        assert!(payment.validate_fresh().is_ok());
    }

    #[test]
    fn fresh_payment_rejects_preset_status() {
        let (mut sender, receiver) = fresh_pair();
        sender.status = Status::NeedsKycData;
        let action = PaymentAction::new(10, "TIK", "charge", "t").unwrap();
        let payment = PaymentObject::new_root(
            sender, receiver, "vasp_a_1", "vasp_a_1", action,
        );
        assert!(payment.validate_fresh().is_err());
    }

    #[test]
    fn update_rejects_changed_write_once_field() {
        let (sender, receiver) = fresh_pair();
        let action = PaymentAction::new(10, "TIK", "charge", "t").unwrap();
        let old = PaymentObject::new_root(
            sender, receiver, "vasp_a_1", "vasp_a_1", action,
        );
        let mut new = old.new_version();
        new.description = Some("changed".to_string());
        assert!(old.validate_update(&new, true).is_err());
    }

    #[test]
    fn update_rejects_local_side_touched_by_peer() {
        let (sender, receiver) = fresh_pair();
        let action = PaymentAction::new(10, "TIK", "charge", "t").unwrap();
        let old = PaymentObject::new_root(
            sender, receiver, "vasp_a_1", "vasp_a_1", action,
        );
        let mut new = old.new_version();
        // We are the sender; the update must not touch our own side.
        new.sender.status = Status::NeedsKycData;
        assert!(old.validate_update(&new, true).is_err());
    }

    #[test]
    fn update_accepts_valid_receiver_transition() {
        let (sender, receiver) = fresh_pair();
        let action = PaymentAction::new(10, "TIK", "charge", "t").unwrap();
        let old = PaymentObject::new_root(
            sender, receiver, "vasp_a_1", "vasp_a_1", action,
        );
        let mut new = old.new_version();
        new.receiver.status = Status::NeedsKycData;
        // We are the sender, the receiver (other side) moved.
        assert!(old.validate_update(&new, true).is_ok());
    }
}
