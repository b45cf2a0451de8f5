//! Commands: atomic proposals that consume zero-or-one shared-object
//! versions and create exactly one.

use crate::address::Address;
use crate::error::CommandError;
use crate::store::VersionedObjectStore;
use crate::version::{SharedObject, VersionId};

/// Whether a sequenced command ultimately committed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommitStatus {
    Pending,
    Success,
    Fail,
}

/// A command over a [`VersionedObjectStore`] of `T`. Payment commands in
/// this core always have at most one dependency and exactly one created
/// version; the trait is left general so the executor isn't payment-specific.
pub trait Command<T: SharedObject>: Clone {
    /// Versions consumed: empty for a fresh creation, or a single version
    /// for an update.
    fn dependencies(&self) -> &[VersionId];

    /// The single version this command creates.
    fn creates(&self) -> VersionId;

    /// The VASP that proposed this command.
    fn origin(&self) -> &Address;

    /// Instantiates the object this command creates, given the dependency
    /// (if any) already present in `store`. Called once, at sequencing time.
    fn get_object(
        &self,
        store: &VersionedObjectStore<T>,
    ) -> Result<T, CommandError>;
}

/// The two VASP addresses that frame a single channel, handed to a
/// [`CommandProcessor`] so it can validate a command's parties without
/// needing a back-reference to the channel itself (see the design note on
/// cyclic references).
#[derive(Copy, Clone, Debug)]
pub struct ExecutionContext<'a> {
    pub myself: &'a Address,
    pub other: &'a Address,
}

/// The semantic-validation and commit-notification interface the
/// [`Executor`](crate::executor::Executor) drives commands through.
///
/// `check_command` is fast, synchronous, and local-only: it runs during
/// sequencing and must not block. `process_command` is invoked once per
/// command, on its first transition to `success` or `fail`; it is also
/// synchronous, but implementations that need to do further async work
/// (business callbacks, sending a follow-up command) are expected to spawn
/// that work rather than block the executor on it.
pub trait CommandProcessor<T: SharedObject, C: Command<T>>: Send + Sync {
    fn check_command(
        &self,
        ctx: &ExecutionContext<'_>,
        cmd: &C,
        store: &VersionedObjectStore<T>,
    ) -> Result<(), CommandError>;

    fn process_command(
        &self,
        ctx: &ExecutionContext<'_>,
        cmd: &C,
        seq: u64,
        store: &VersionedObjectStore<T>,
        success: bool,
        error: Option<&CommandError>,
    );
}
