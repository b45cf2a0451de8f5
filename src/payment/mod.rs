//! `PaymentObject` and the types that compose it.

mod action;
mod actor;
mod command;
mod object;

pub use action::{NonPositiveAmount, PaymentAction};
pub use actor::{Kyc, PaymentActor};
pub use command::PaymentCommand;
pub use object::PaymentObject;
