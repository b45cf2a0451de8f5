//! [`PaymentProcessor`]: the [`CommandProcessor`] implementation that
//! enforces payment semantics and drives the business-policy state machine
//! forward after a command commits.
//!
//! Two concerns are deliberately separated, mirroring `lexe-ln`'s
//! `PaymentsManager`:
//!
//! - `check_command`/`process_command` (the [`CommandProcessor`] impl) are
//!   synchronous and run inline with the executor. They never touch
//!   [`BusinessContext`] — only structural/status validation
//!   ([`PaymentObject::validate_fresh`]/[`validate_update`]), plus recording
//!   (and, for our own commands, immediately releasing) the crash-recovery
//!   obligation atomically with the commit itself.
//! - [`PaymentProcessor::payment_process_async`] is the async, business-policy
//!   driven half: given a just-committed payment, it asks [`BusinessContext`]
//!   what (if anything) our side should do next, and — if our side's fields
//!   changed — proposes a follow-up [`PaymentCommand`] on `outbox`, handing
//!   off the obligation for the channel to release once it durably sequences
//!   that follow-up.
//!
//! A follow-up is never proposed directly into the executor from here (this
//! type has no handle to one — see [`crate::channel::Channel`], which owns
//! both the executor and the receiving end of `outbox`); it's only ever
//! queued, matching the "async callback, not a direct re-entrant call" shape
//! the source's `payment_process_async` coroutine has.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::address::Address;
use crate::business::{BusinessContext, BusinessError};
use crate::command::{Command, CommandProcessor, ExecutionContext};
use crate::error::{CommandError, PaymentLogicError};
use crate::payment::{PaymentCommand, PaymentObject};
use crate::status::{self, Status};
use crate::store::VersionedObjectStore;
use crate::version::{SharedObject, VersionId};

/// Identifies one outstanding "we owe the business layer further processing
/// of this payment" obligation, so it survives a crash and can be retried
/// (ground: `persist_command_obligation` / `release_command_obligation` /
/// `list_command_obligations` in the upstream payment logic).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ObligationKey {
    pub reference_id: String,
    pub version: VersionId,
}

/// Durable record of in-flight business processing. A host persists this
/// alongside [`crate::persist::ChannelPersister`] so that a crash between
/// "command committed" and "business follow-up sent" is recoverable via
/// [`PaymentProcessor::retry_process_commands`].
///
/// Plain (non-async) methods, matching the ground truth's
/// `persist_command_obligation`/`release_command_obligation`/
/// `list_command_obligations` — none of those are coroutines in the source,
/// only the business-processing methods around them are. Keeping this trait
/// synchronous is what lets [`PaymentProcessor::process_command`] (itself
/// synchronous, called inline from the executor) record the obligation
/// atomically with the commit it belongs to, rather than handing off to a
/// task that might never run before a crash.
pub trait ObligationLog: Send + Sync {
    fn persist(&self, key: ObligationKey, payment: PaymentObject);
    fn release(&self, key: &ObligationKey);
    fn list(&self) -> Vec<(ObligationKey, PaymentObject)>;
}

/// The [`CommandProcessor`] for [`PaymentObject`]/[`PaymentCommand`].
pub struct PaymentProcessor<B, O> {
    business: Arc<B>,
    obligations: Arc<O>,
    reference_id_index: StdMutex<HashMap<String, PaymentObject>>,
    outbox: mpsc::UnboundedSender<(ObligationKey, PaymentCommand)>,
}

impl<B, O> PaymentProcessor<B, O>
where
    B: BusinessContext + 'static,
    O: ObligationLog + 'static,
{
    /// Builds a processor plus the receiving end of its follow-up command
    /// outbox; the caller (a [`crate::channel::Channel`]) drains the
    /// receiver and feeds every command it yields back into its own
    /// executor as a locally-proposed (`strict = true`) command.
    pub fn new(
        business: Arc<B>,
        obligations: Arc<O>,
    ) -> (Self, mpsc::UnboundedReceiver<(ObligationKey, PaymentCommand)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let processor = Self {
            business,
            obligations,
            reference_id_index: StdMutex::new(HashMap::new()),
            outbox: tx,
        };
        (processor, rx)
    }

    pub fn latest_by_reference_id(&self, reference_id: &str) -> Option<PaymentObject> {
        self.reference_id_index
            .lock()
            .unwrap()
            .get(reference_id)
            .cloned()
    }

    fn update_reference_id_index(&self, payment: &PaymentObject) {
        let mut index = self.reference_id_index.lock().unwrap();
        // Only advance the index if this command built on the version it
        // currently points at — an out-of-order confirmation (shouldn't
        // happen, the executor serializes these) must not regress it.
        let is_stale = match index.get(&payment.reference_id) {
            Some(current) if !payment.previous_versions().is_empty() => {
                payment.previous_versions().first() != Some(&current.version())
            }
            _ => false,
        };
        if is_stale {
            warn!(
                reference_id = %payment.reference_id,
                "skipping reference_id_index update: stale dependency",
            );
            return;
        }
        index.insert(payment.reference_id.clone(), payment.clone());
    }

    fn my_role_is_sender(&self, payment: &PaymentObject, myself: &Address) -> bool {
        &payment.sender.address == myself
    }

    /// Releases an obligation once its follow-up (if any) has been durably
    /// sequenced. Called by [`crate::channel::Channel`] after
    /// [`crate::channel::Channel::sequence_command_local`] persists the
    /// follow-up drained from `outbox` — never before, so a crash between
    /// this processor handing off a follow-up and the channel durably
    /// queuing it always leaves the obligation in place for retry.
    pub(crate) fn release_obligation(&self, key: &ObligationKey) {
        self.obligations.release(key);
    }

    /// Replays every surviving obligation, e.g. on startup after a crash.
    /// Obligations are independent of each other (distinct `reference_id`s),
    /// so they're driven concurrently rather than one at a time.
    #[instrument(skip(self, myself, other))]
    pub async fn retry_process_commands(&self, myself: &Address, other: &Address) {
        let mut retries: FuturesUnordered<_> = self
            .obligations
            .list()
            .into_iter()
            .map(|(key, payment)| async move {
                info!(reference_id = %key.reference_id, "retrying payment obligation");
                self.payment_process_async(myself, other, payment).await;
            })
            .collect();
        while retries.next().await.is_some() {}
    }

    /// The business-driven half of processing: given a committed payment,
    /// asks [`BusinessContext`] what our side should do next and, if our
    /// own fields changed as a result, emits a follow-up command on
    /// `outbox`.
    ///
    /// Mirrors `payment_process_async` in the source: account existence,
    /// KYC exchange in both directions, settlement readiness, and final
    /// settlement confirmation, in that order, each step short-circuiting
    /// on [`BusinessError::ForceAbort`].
    #[instrument(skip(self, myself, other, payment), fields(reference_id = %payment.reference_id))]
    pub async fn payment_process_async(
        &self,
        myself: &Address,
        other: &Address,
        payment: PaymentObject,
    ) {
        // The obligation was already persisted synchronously by
        // `process_command` atomically with the commit; this method only
        // ever runs for an obligation that's already on record.
        let key = ObligationKey {
            reference_id: payment.reference_id.clone(),
            version: payment.version(),
        };

        let outcome = self.run_business_steps(myself, payment.clone()).await;

        let new_payment = match outcome {
            Ok(new_payment) => new_payment,
            Err(ProcessAsyncError::Business(BusinessError::ForceAbort)) => {
                let my_is_sender = self.my_role_is_sender(&payment, myself);
                let my_status = payment.actor(my_is_sender).status;
                let other_status = payment.actor(!my_is_sender).status;
                if status::is_valid_transition(my_is_sender, my_status, other_status, Status::Abort)
                    .is_err()
                {
                    warn!("business forced abort past the finality barrier, ignoring");
                    return;
                }
                let mut aborted = payment.new_version();
                aborted.actor_mut(my_is_sender).status = Status::Abort;
                aborted
            }
            Err(ProcessAsyncError::Business(e)) => {
                warn!(error = %e, "business layer rejected payment, leaving obligation in place");
                return;
            }
            Err(ProcessAsyncError::Internal(e)) => {
                tracing::error!(error = %e, "internal consistency check failed processing payment, leaving obligation in place");
                return;
            }
        };

        if payment.has_changed_from(&new_payment) {
            let is_fresh = payment.previous_versions().is_empty()
                && new_payment.previous_versions().is_empty();
            let cmd = if is_fresh {
                PaymentCommand::new_payment(myself.clone(), new_payment)
            } else {
                PaymentCommand::update(myself.clone(), new_payment)
            };
            // Hand the follow-up and the obligation it discharges to the
            // channel together; the obligation is released only once the
            // channel durably sequences this command, not here — releasing
            // it now would leave a crash between this send and that
            // sequencing able to lose the follow-up with nothing left to
            // recover it.
            if self.outbox.send((key, cmd)).is_err() {
                warn!("follow-up command dropped: channel receiver gone");
            }
        } else {
            // Nothing to wait on: release immediately.
            self.obligations.release(&key);
        }

        let _ = other;
    }

    async fn run_business_steps(
        &self,
        myself: &Address,
        payment: PaymentObject,
    ) -> Result<PaymentObject, ProcessAsyncError> {
        let my_is_sender = self.my_role_is_sender(&payment, myself);
        let my_status = payment.actor(my_is_sender).status;
        let peer_status = payment.actor(!my_is_sender).status;

        // The peer has already aborted: follow suit on our own side, subject
        // to the finality barrier, before running any business callback —
        // mirrors the unconditional `if other_status == Status.abort` check
        // at the top of the source's `payment_process_async`, ahead of
        // everything else.
        if peer_status == Status::Abort {
            let mut aborted = payment.new_version();
            if status::is_valid_transition(my_is_sender, my_status, peer_status, Status::Abort)
                .is_ok()
            {
                aborted.actor_mut(my_is_sender).status = Status::Abort;
            }
            let new_status = aborted.actor(my_is_sender).status;
            status::is_valid_transition(my_is_sender, my_status, peer_status, new_status)
                .map_err(ProcessAsyncError::Internal)?;
            return Ok(aborted);
        }

        self.business.check_account_existence(&payment).await?;

        let mut current = payment.clone();

        // Informational: what level we'd ask the counterparty to provide.
        // This crate has no separate wire message for a bare KYC request —
        // the request is carried implicitly by our own status — so the
        // result is only logged here, not stored.
        let requested_level = self.business.next_kyc_level_to_request(&current).await?;
        debug!(?requested_level, "next KYC level to request from counterparty");

        let to_provide = self.business.next_kyc_to_provide(&current).await?;
        for level in to_provide {
            let my_status = current.actor(my_is_sender).status;
            if my_status.height().unwrap_or(u8::MAX) >= level.height().unwrap_or(0) {
                continue;
            }
            if level == Status::NeedsRecipientSignature {
                if my_is_sender {
                    continue;
                }
                let signature = self.business.get_recipient_signature(&current).await?;
                current.recipient_signature = Some(signature);
            } else if level == Status::NeedsKycData {
                let kyc = self.business.get_extended_kyc(&current).await?;
                current.actor_mut(my_is_sender).kyc = Some(crate::payment::Kyc {
                    kyc_data: kyc.kyc_data,
                    kyc_signature: kyc.kyc_signature,
                    kyc_certificate: kyc.kyc_certificate,
                });
            }
            current.actor_mut(my_is_sender).status = level;
        }

        let my_status = current.actor(my_is_sender).status;
        if !my_status.is_final() && self.business.ready_for_settlement(&current).await? {
            current.actor_mut(my_is_sender).status = Status::ReadyForSettlement;
        }

        if my_is_sender {
            let my_status = current.actor(my_is_sender).status;
            if my_status.is_past_finality_barrier()
                && !my_status.is_final()
                && self.business.has_settled(&current).await?
            {
                if current.recipient_signature.is_some() {
                    self.business.validate_recipient_signature(&current).await?;
                }
                current.actor_mut(true).status = Status::Settled;
            }
        }

        let old_status = payment.actor(my_is_sender).status;
        let other_status = current.actor(!my_is_sender).status;
        let new_status = current.actor(my_is_sender).status;
        status::is_valid_transition(my_is_sender, old_status, other_status, new_status)
            .map_err(ProcessAsyncError::Internal)?;

        if current.has_changed_from(&payment) {
            Ok(current.new_version())
        } else {
            Ok(payment)
        }
    }
}

/// Internal split between a [`BusinessError`] (the business layer declined
/// or isn't ready) and a [`PaymentLogicError`] raised by this processor's own
/// final consistency check — the two are handled differently in
/// [`PaymentProcessor::payment_process_async`] (the latter always leaves
/// the obligation in place for investigation, never auto-aborts).
#[derive(Debug)]
enum ProcessAsyncError {
    Business(BusinessError),
    Internal(PaymentLogicError),
}

impl From<BusinessError> for ProcessAsyncError {
    fn from(e: BusinessError) -> Self {
        Self::Business(e)
    }
}

impl<B, O> CommandProcessor<PaymentObject, PaymentCommand> for PaymentProcessor<B, O>
where
    B: BusinessContext,
    O: ObligationLog,
{
    fn check_command(
        &self,
        ctx: &ExecutionContext<'_>,
        cmd: &PaymentCommand,
        store: &VersionedObjectStore<PaymentObject>,
    ) -> Result<(), CommandError> {
        let new_payment = cmd.payment();
        let origin = cmd.origin();
        if origin != ctx.myself && origin != ctx.other {
            return Err(CommandError::from(PaymentLogicError::WrongOrigin));
        }

        let sender_addr = &new_payment.sender.address;
        let receiver_addr = &new_payment.receiver.address;
        let parties_match = (sender_addr == ctx.myself && receiver_addr == ctx.other)
            || (sender_addr == ctx.other && receiver_addr == ctx.myself);
        if !parties_match {
            return Err(CommandError::from(PaymentLogicError::WrongParties {
                expected: (ctx.myself.to_string(), ctx.other.to_string()),
                actual: (sender_addr.to_string(), receiver_addr.to_string()),
            }));
        }

        if origin == ctx.myself {
            // Commands we originated are not semantically re-checked here —
            // we validated them at creation time, before proposing.
            return Ok(());
        }

        match cmd.dependencies().first() {
            None => {
                // Only a root payment's reference_id is pinned to its
                // proposer; a follow-up update keeps whatever reference_id
                // the payment was created with, regardless of who proposes
                // the next version.
                let expected_prefix = format!("{origin}_");
                if !new_payment.reference_id.starts_with(&expected_prefix) {
                    return Err(CommandError::MalformedReferenceId {
                        reference_id: new_payment.reference_id.clone(),
                    });
                }
                new_payment.validate_fresh().map_err(CommandError::from)
            }
            Some(dependency) => {
                let old = store.get(dependency).ok_or(
                    CommandError::DependencyNotLive {
                        version: *dependency,
                    },
                )?;
                let my_role_is_sender =
                    self.my_role_is_sender(old, ctx.myself);
                old.validate_update(new_payment, my_role_is_sender)
                    .map_err(CommandError::from)
            }
        }
    }

    fn process_command(
        &self,
        ctx: &ExecutionContext<'_>,
        cmd: &PaymentCommand,
        seq: u64,
        _store: &VersionedObjectStore<PaymentObject>,
        success: bool,
        error: Option<&CommandError>,
    ) {
        if !success {
            if let Some(e) = error {
                warn!(%seq, reference_id = %cmd.payment().reference_id, error = %e, "payment command failed");
            }
            return;
        }
        let payment = cmd.payment();
        self.update_reference_id_index(payment);

        // Record the crash-recovery obligation atomically with the commit,
        // before any async follow-up is scheduled — ground: the source
        // records `persist_command_obligation` directly inside the
        // synchronous half of `process_command`, not inside the task it
        // spawns afterwards.
        let key = ObligationKey {
            reference_id: payment.reference_id.clone(),
            version: payment.version(),
        };
        self.obligations.persist(key.clone(), payment.clone());
        if cmd.origin() == ctx.myself {
            // Our own proposals already went through business review before
            // being proposed, so `payment_process_async` never runs for
            // them (see `Channel::process_command_success_async`) and
            // nothing else will ever release this obligation.
            self.obligations.release(&key);
        }
    }
}
