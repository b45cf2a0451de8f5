//! The dependency-tracked command executor: turns a sequence of proposed
//! [`Command`]s into a linear, speculatively-then-confirmedly committed log
//! over a [`VersionedObjectStore`].
//!
//! A command is sequenced in two steps, matching the request/response
//! round-trip of the channel protocol above it:
//!
//! 1. [`Executor::sequence_next_command`] assigns the command the next
//!    `seq_no`, runs [`CommandProcessor::check_command`], and — if that
//!    passes — instantiates the object via [`Command::get_object`] and
//!    inserts it into the store as `potentially_live` (but not yet
//!    `actually_live`). This is speculative: the command is ours to roll
//!    back if it never gets confirmed.
//! 2. [`Executor::set_success`] or [`Executor::set_fail`] is called once the
//!    confirmation (our own re-derivation of the peer's result, or the
//!    peer's response to our own proposal) is in hand, finalizing the
//!    sequence entry and notifying the [`CommandProcessor`].

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, instrument, warn};

use crate::address::Address;
use crate::command::{Command, CommandProcessor, CommitStatus, ExecutionContext};
use crate::error::{CommandError, ExecutorError};
use crate::store::VersionedObjectStore;
use crate::version::SharedObject;

/// A single slot in the executor's sequence.
#[derive(Clone, Debug)]
struct SequencedEntry<C> {
    command: C,
    status: CommitStatus,
    error: Option<CommandError>,
}

/// The outcome of [`Executor::sequence_next_command`]: where the command
/// landed, and whether `check_command` passed.
///
/// A non-strict failure is still assigned a `position` (recorded as `Fail`
/// for audit) without returning an `Err`; only a strict failure, or an
/// executor-internal error, comes back as `Err`.
#[derive(Debug)]
pub struct SequenceOutcome {
    pub position: u64,
    pub result: Result<(), CommandError>,
}

/// Dependency-tracked sequencer for one channel's command log.
///
/// `T` is the shared object type, `C` the command type that produces it, and
/// `P` the business-logic hook invoked at every check and commit.
pub struct Executor<T: SharedObject, C: Command<T>, P: CommandProcessor<T, C>> {
    myself: Address,
    other: Address,
    store: VersionedObjectStore<T>,
    sequence: Vec<SequencedEntry<C>>,
    /// The next `seq_no` expected by `set_success`/`set_fail`. Confirmations
    /// must arrive in strictly ascending order with no gaps.
    last_confirmed: u64,
    processor: P,
}

impl<T, C, P> Executor<T, C, P>
where
    T: SharedObject,
    C: Command<T>,
    P: CommandProcessor<T, C>,
{
    pub fn new(myself: Address, other: Address, processor: P) -> Self {
        Self {
            myself,
            other,
            store: VersionedObjectStore::new(),
            sequence: Vec::new(),
            last_confirmed: 0,
            processor,
        }
    }

    pub fn store(&self) -> &VersionedObjectStore<T> {
        &self.store
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// The next `seq_no` that [`Self::sequence_next_command`] will assign.
    pub fn next_seq(&self) -> u64 {
        self.sequence.len() as u64
    }

    /// The next `seq_no` expected by `set_success`/`set_fail`.
    pub fn last_confirmed(&self) -> u64 {
        self.last_confirmed
    }

    fn ctx(&self) -> ExecutionContext<'_> {
        ExecutionContext {
            myself: &self.myself,
            other: &self.other,
        }
    }

    pub fn command_at(&self, seq_no: u64) -> Option<&C> {
        self.sequence.get(seq_no as usize).map(|e| &e.command)
    }

    pub fn status_at(&self, seq_no: u64) -> Option<CommitStatus> {
        self.sequence.get(seq_no as usize).map(|e| e.status)
    }

    /// Checks `cmd`'s dependency against the right liveness flag for its
    /// origin: our own proposals may build on our own speculative
    /// (`potentially_live`) state, but a peer's proposal must build on state
    /// we've already confirmed (`actually_live`) — we don't let the peer's
    /// sequencing race our own unconfirmed commands.
    fn dependency_is_live(&self, cmd: &C) -> Result<(), ExecutorError> {
        let is_own = cmd.origin() == &self.myself;
        for dep in cmd.dependencies() {
            let live = if is_own {
                self.store.is_potentially_live(dep)
            } else {
                self.store.is_actually_live(dep)
            };
            if !live {
                return Err(ExecutorError::DependencyNotLive { version: *dep });
            }
        }
        Ok(())
    }

    /// Assigns `cmd` the next `seq_no`, checks it, and — if it passes —
    /// speculatively commits its created object to the store.
    ///
    /// `strict`: if `true`, a failed `check_command` is returned as `Err`
    /// and `cmd` is not sequenced at all (used when the local side is
    /// itself proposing `cmd`, and a check failure means the proposal
    /// should never leave this process). If `false`, a failed check still
    /// occupies the next slot (`Pending`, with no created object) so both
    /// sides agree on the shared sequence; the caller is expected to follow
    /// up with [`Self::set_fail`] at `position` in the same critical
    /// section, matching the channel's "sequence, then immediately
    /// confirm" handling of an inbound request.
    #[instrument(skip(self, cmd), fields(position = self.next_seq()))]
    pub fn sequence_next_command(
        &mut self,
        cmd: C,
        strict: bool,
    ) -> Result<SequenceOutcome, ExecutorError> {
        let position = self.next_seq();

        if let Err(e) = self.dependency_is_live(&cmd) {
            let ExecutorError::DependencyNotLive { version: dep } = e else {
                unreachable!("dependency_is_live only returns DependencyNotLive")
            };
            if strict {
                return Err(ExecutorError::DependencyNotLive { version: dep });
            }
            let error = CommandError::DependencyNotLive { version: dep };
            warn!(%position, "sequencing with unmet dependency, deferring to set_fail");
            self.sequence.push(SequencedEntry {
                command: cmd,
                status: CommitStatus::Pending,
                error: None,
            });
            return Ok(SequenceOutcome {
                position,
                result: Err(error),
            });
        }

        let check = self.processor.check_command(&self.ctx(), &cmd, &self.store);
        if let Err(e) = check {
            if strict {
                return Err(ExecutorError::CannotSequence(e));
            }
            debug!(%position, error = %e, "check_command failed, deferring to set_fail");
            self.sequence.push(SequencedEntry {
                command: cmd,
                status: CommitStatus::Pending,
                error: None,
            });
            return Ok(SequenceOutcome {
                position,
                result: Err(e),
            });
        }

        let version = cmd.creates();
        let object = match panic::catch_unwind(AssertUnwindSafe(|| {
            cmd.get_object(&self.store)
        })) {
            Ok(Ok(object)) => object,
            Ok(Err(e)) => {
                if strict {
                    return Err(ExecutorError::CannotSequence(e));
                }
                self.sequence.push(SequencedEntry {
                    command: cmd,
                    status: CommitStatus::Pending,
                    error: None,
                });
                return Ok(SequenceOutcome {
                    position,
                    result: Err(e),
                });
            }
            Err(_) => return Err(ExecutorError::ObjectConstruction { version }),
        };

        self.store.insert(object);
        if let Some(entry) = self.store.entry_mut(&version) {
            entry.set_potentially_live(true);
        }

        debug!(%position, %version, "sequenced, pending confirmation");
        self.sequence.push(SequencedEntry {
            command: cmd,
            status: CommitStatus::Pending,
            error: None,
        });
        Ok(SequenceOutcome {
            position,
            result: Ok(()),
        })
    }

    /// Confirms the command at `seq_no` as committed: marks its created
    /// version `actually_live`, destroys its consumed dependency (if any)
    /// from the store, and notifies the processor.
    #[instrument(skip(self))]
    pub fn set_success(&mut self, seq_no: u64) -> Result<(), ExecutorError> {
        self.check_confirmation_order(seq_no)?;
        let entry = self
            .sequence
            .get(seq_no as usize)
            .ok_or(ExecutorError::UnknownSequenceNumber { seq_no })?;

        let version = entry.command.creates();
        if self.store.entry_mut(&version).is_none() {
            return Err(ExecutorError::MissingDependency { version });
        }
        self.store
            .entry_mut(&version)
            .expect("checked above")
            .set_actually_live(true);

        for dep in entry.command.dependencies() {
            self.store.remove(dep);
        }

        let command = entry.command.clone();
        self.sequence[seq_no as usize].status = CommitStatus::Success;
        self.last_confirmed += 1;
        self.processor.process_command(
            &self.ctx(),
            &command,
            seq_no,
            &self.store,
            true,
            None,
        );
        Ok(())
    }

    /// `set_success`/`set_fail` must be called strictly in ascending
    /// `seq_no` order with no gaps; this enforces that, distinguishing
    /// a re-delivered confirmation (`DuplicateConfirmation`) from one that
    /// skips ahead (`OutOfOrderConfirmation`).
    fn check_confirmation_order(&self, seq_no: u64) -> Result<(), ExecutorError> {
        if seq_no < self.last_confirmed {
            return Err(ExecutorError::DuplicateConfirmation { seq_no });
        }
        if seq_no > self.last_confirmed {
            return Err(ExecutorError::OutOfOrderConfirmation {
                expected: self.last_confirmed,
                got: seq_no,
            });
        }
        Ok(())
    }

    /// Confirms the command at `seq_no` as failed: discards its
    /// speculatively-created object and notifies the processor. Its
    /// dependency (if any) is untouched — dependencies are only ever
    /// consumed by the command that *successfully* builds on them, so a
    /// failed command leaves the store exactly as it found it aside from
    /// its own speculative entry.
    #[instrument(skip(self, error))]
    pub fn set_fail(
        &mut self,
        seq_no: u64,
        error: CommandError,
    ) -> Result<(), ExecutorError> {
        self.check_confirmation_order(seq_no)?;
        let entry = self
            .sequence
            .get(seq_no as usize)
            .ok_or(ExecutorError::UnknownSequenceNumber { seq_no })?;

        let version = entry.command.creates();
        self.store.remove(&version);

        let command = entry.command.clone();
        self.sequence[seq_no as usize].status = CommitStatus::Fail;
        self.sequence[seq_no as usize].error = Some(error.clone());
        self.last_confirmed += 1;
        self.processor.process_command(
            &self.ctx(),
            &command,
            seq_no,
            &self.store,
            false,
            Some(&error),
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::payment::{PaymentAction, PaymentActor, PaymentCommand, PaymentObject};

    struct NoopProcessor;

    impl CommandProcessor<PaymentObject, PaymentCommand> for NoopProcessor {
        fn check_command(
            &self,
            _ctx: &ExecutionContext<'_>,
            _cmd: &PaymentCommand,
            _store: &VersionedObjectStore<PaymentObject>,
        ) -> Result<(), CommandError> {
            Ok(())
        }

        fn process_command(
            &self,
            _ctx: &ExecutionContext<'_>,
            _cmd: &PaymentCommand,
            _seq: u64,
            _store: &VersionedObjectStore<PaymentObject>,
            _success: bool,
            _error: Option<&CommandError>,
        ) {
        }
    }

    fn fresh_payment_command(origin: &Address) -> PaymentCommand {
        let sender = PaymentActor::new(Address::from("a"), "sub_a");
        let receiver = PaymentActor::new(Address::from("b"), "sub_b");
        let action = PaymentAction::new(10, "TIK", "charge", "t").unwrap();
        let payment =
            PaymentObject::new_root(sender, receiver, "a_1", "a_1", action);
        PaymentCommand::new_payment(origin.clone(), payment)
    }

    #[test]
    fn sequence_then_confirm_marks_actually_live() {
        let myself = Address::from("a");
        let other = Address::from("b");
        let mut executor = Executor::new(myself.clone(), other, NoopProcessor);

        let cmd = fresh_payment_command(&myself);
        let version = cmd.creates();
        let outcome = executor.sequence_next_command(cmd, true).unwrap();
        assert_eq!(outcome.position, 0);
        assert!(outcome.result.is_ok());
        assert!(executor.store().is_potentially_live(&version));
        assert!(!executor.store().is_actually_live(&version));

        executor.set_success(0).unwrap();
        assert!(executor.store().is_actually_live(&version));
        assert_eq!(executor.status_at(0), Some(CommitStatus::Success));
    }

    #[test]
    fn set_fail_discards_the_speculative_object() {
        let myself = Address::from("a");
        let other = Address::from("b");
        let mut executor = Executor::new(myself.clone(), other, NoopProcessor);

        let cmd = fresh_payment_command(&myself);
        let version = cmd.creates();
        executor.sequence_next_command(cmd, true).unwrap();
        assert!(executor.store().contains(&version));

        executor
            .set_fail(0, CommandError::MalformedReferenceId {
                reference_id: "x".into(),
            })
            .unwrap();
        assert!(!executor.store().contains(&version));
        assert_eq!(executor.status_at(0), Some(CommitStatus::Fail));
    }

    #[test]
    fn non_strict_failure_occupies_a_pending_slot_for_set_fail() {
        let myself = Address::from("a");
        let other = Address::from("b");
        let mut executor = Executor::new(myself.clone(), other.clone(), NoopProcessor);

        // `other` depends on a version nobody ever sequenced into this store.
        let sender = PaymentActor::new(Address::from("a"), "sub_a");
        let receiver = PaymentActor::new(Address::from("b"), "sub_b");
        let action = PaymentAction::new(1, "TIK", "charge", "t").unwrap();
        let root = PaymentObject::new_root(sender, receiver, "b_1", "b_1", action);
        let payment = root.new_version();
        let cmd = PaymentCommand::update(other, payment);

        let outcome = executor.sequence_next_command(cmd, false).unwrap();
        assert_eq!(outcome.position, 0);
        assert!(outcome.result.is_err());
        // Not yet finalized: the slot is occupied but still pending.
        assert_eq!(executor.status_at(0), Some(CommitStatus::Pending));

        let error = outcome.result.unwrap_err();
        executor.set_fail(0, error).unwrap();
        assert_eq!(executor.status_at(0), Some(CommitStatus::Fail));
        assert_eq!(executor.last_confirmed(), 1);
    }

    #[test]
    fn double_confirmation_is_rejected() {
        let myself = Address::from("a");
        let other = Address::from("b");
        let mut executor = Executor::new(myself.clone(), other, NoopProcessor);
        let cmd = fresh_payment_command(&myself);
        executor.sequence_next_command(cmd, true).unwrap();
        executor.set_success(0).unwrap();
        assert!(matches!(
            executor.set_success(0),
            Err(ExecutorError::DuplicateConfirmation { seq_no: 0 })
        ));
    }

    #[test]
    fn peer_command_cannot_build_on_our_speculative_state() {
        let myself = Address::from("a");
        let other = Address::from("b");
        let mut executor = Executor::new(myself.clone(), other.clone(), NoopProcessor);

        let root = fresh_payment_command(&myself);
        let root_version = root.creates();
        executor.sequence_next_command(root, true).unwrap();
        // Not yet confirmed: only `potentially_live`, not `actually_live`.

        let mut payment = executor.store().get(&root_version).unwrap().clone();
        payment.receiver.status = crate::status::Status::NeedsKycData;
        let update = payment.new_version();
        let cmd = PaymentCommand::update(other, update);

        let result = executor.sequence_next_command(cmd, true);
        assert!(matches!(
            result,
            Err(ExecutorError::DependencyNotLive { version }) if version == root_version
        ));
    }
}
