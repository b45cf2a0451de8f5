//! `PaymentCommand`: the only [`Command`] implementation in the core.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::command::Command;
use crate::error::CommandError;
use crate::payment::object::PaymentObject;
use crate::store::VersionedObjectStore;
use crate::version::{SharedObject, VersionId};

/// Proposes either a fresh payment (`previous_versions` empty) or an update
/// to an existing one (`previous_versions = [dependency]`).
///
/// The wire payload is the fully-formed new [`PaymentObject`] rather than a
/// structural diff against the dependency: since [`PaymentObject::new_version`]
/// already copies the base object and stamps a fresh [`VersionId`], the new
/// object *is* a sufficient description of the diff, and re-deriving one
/// from a separate diff representation would be redundant bookkeeping.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PaymentCommand {
    origin: Address,
    new_payment: PaymentObject,
}

impl PaymentCommand {
    /// Proposes a brand-new payment. `payment` must have empty
    /// `previous_versions`.
    pub fn new_payment(origin: Address, payment: PaymentObject) -> Self {
        debug_assert!(payment.previous_versions().is_empty());
        Self {
            origin,
            new_payment: payment,
        }
    }

    /// Proposes an update derived via [`PaymentObject::new_version`].
    /// `payment` must have exactly one previous version.
    pub fn update(origin: Address, payment: PaymentObject) -> Self {
        debug_assert_eq!(payment.previous_versions().len(), 1);
        Self {
            origin,
            new_payment: payment,
        }
    }

    pub fn payment(&self) -> &PaymentObject {
        &self.new_payment
    }

    pub fn into_payment(self) -> PaymentObject {
        self.new_payment
    }
}

impl Command<PaymentObject> for PaymentCommand {
    fn dependencies(&self) -> &[VersionId] {
        self.new_payment.previous_versions()
    }

    fn creates(&self) -> VersionId {
        self.new_payment.version()
    }

    fn origin(&self) -> &Address {
        &self.origin
    }

    fn get_object(
        &self,
        store: &VersionedObjectStore<PaymentObject>,
    ) -> Result<PaymentObject, CommandError> {
        if let Some(dependency) = self.dependencies().first() {
            if !store.contains(dependency) {
                return Err(CommandError::DependencyNotLive {
                    version: *dependency,
                });
            }
        }
        Ok(self.new_payment.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::payment::action::PaymentAction;
    use crate::payment::actor::PaymentActor;

    #[test]
    fn fresh_command_has_no_dependencies() {
        let sender = PaymentActor::new(Address::from("a"), "sub_a");
        let receiver = PaymentActor::new(Address::from("b"), "sub_b");
        let action = PaymentAction::new(1, "TIK", "charge", "t").unwrap();
        let payment =
            PaymentObject::new_root(sender, receiver, "a_1", "a_1", action);
        let cmd = PaymentCommand::new_payment(Address::from("a"), payment);
        assert!(cmd.dependencies().is_empty());
    }

    #[test]
    fn update_command_depends_on_previous_version() {
        let sender = PaymentActor::new(Address::from("a"), "sub_a");
        let receiver = PaymentActor::new(Address::from("b"), "sub_b");
        let action = PaymentAction::new(1, "TIK", "charge", "t").unwrap();
        let old =
            PaymentObject::new_root(sender, receiver, "a_1", "a_1", action);
        let old_version = old.version();
        let new = old.new_version();
        let cmd = PaymentCommand::update(Address::from("a"), new);
        assert_eq!(cmd.dependencies(), &[old_version]);
    }
}
