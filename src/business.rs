//! The `BusinessContext` capability: KYC policy, settlement decisions, and
//! signature validation, supplied by the host process and consumed by the
//! [`PaymentProcessor`](crate::processor::PaymentProcessor).

use async_trait::async_trait;
use thiserror::Error;

use crate::payment::PaymentObject;
use crate::status::Status;

/// Errors a [`BusinessContext`] method may signal back to the processor.
#[derive(Clone, Debug, Error)]
pub enum BusinessError {
    /// A business policy decision to terminate this payment. Translated to
    /// a `Status::Abort` transition when the finality barrier allows it.
    #[error("business policy forced an abort")]
    ForceAbort,
    /// A signature or other submitted data failed validation.
    #[error("business validation failed: {reason}")]
    ValidationFailure { reason: String },
    /// Not decided yet; ping me later. In the fully async design this
    /// should be rare — prefer genuinely suspending the `async fn` — but is
    /// kept as an explicit variant for business layers that poll.
    #[error("business decision pending, callback id {callback_id}")]
    AsyncInterrupt { callback_id: String },
}

/// The external capability (KYC policy, settlement decisions, signature
/// validation) the processor consumes. Implemented by the host process;
/// this crate only defines the boundary.
#[async_trait]
pub trait BusinessContext: Send + Sync {
    /// Whether the local VASP is the recipient of this payment.
    fn is_recipient(&self, payment: &PaymentObject) -> bool;

    /// Whether the local VASP is the sender of this payment.
    fn is_sender(&self, payment: &PaymentObject) -> bool {
        !self.is_recipient(payment)
    }

    /// Checks that the counterparty account exists and is eligible to
    /// transact. May return [`BusinessError::ForceAbort`].
    async fn check_account_existence(
        &self,
        payment: &PaymentObject,
    ) -> Result<(), BusinessError>;

    /// The next KYC level we should *request* from the other side, or
    /// `Status::None` if nothing further is needed right now.
    async fn next_kyc_level_to_request(
        &self,
        payment: &PaymentObject,
    ) -> Result<Status, BusinessError>;

    /// The set of KYC-related statuses we should *provide* data for on this
    /// pass (e.g. `{NeedsKycData}`, `{NeedsRecipientSignature}`, both, or
    /// neither).
    async fn next_kyc_to_provide(
        &self,
        payment: &PaymentObject,
    ) -> Result<Vec<Status>, BusinessError>;

    /// Produces extended KYC data, signature, and certificate to attach to
    /// our own actor.
    async fn get_extended_kyc(
        &self,
        payment: &PaymentObject,
    ) -> Result<ExtendedKyc, BusinessError>;

    /// Produces the recipient's signature over the payment, for the
    /// receiver to attach.
    async fn get_recipient_signature(
        &self,
        payment: &PaymentObject,
    ) -> Result<String, BusinessError>;

    /// Whether we're ready to move to `ready_for_settlement`.
    async fn ready_for_settlement(
        &self,
        payment: &PaymentObject,
    ) -> Result<bool, BusinessError>;

    /// Whether settlement has actually completed on our side.
    async fn has_settled(
        &self,
        payment: &PaymentObject,
    ) -> Result<bool, BusinessError>;

    /// Validates any signature present on `payment`, raising
    /// [`BusinessError::ValidationFailure`] on failure.
    async fn validate_recipient_signature(
        &self,
        payment: &PaymentObject,
    ) -> Result<(), BusinessError>;
}

/// KYC data, signature, and certificate bundle returned by
/// [`BusinessContext::get_extended_kyc`]. All-or-none, mirroring
/// [`crate::payment::PaymentActor`]'s KYC fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtendedKyc {
    pub kyc_data: String,
    pub kyc_signature: String,
    pub kyc_certificate: String,
}
