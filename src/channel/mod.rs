//! [`Channel`]: the per-pair protocol state machine that serializes two
//! interleaved proposal streams into the executor's single shared sequence.
//!
//! A channel is a serial executor: every method here takes `&mut self`
//! and is meant to run on a single task per channel — a host that wants
//! concurrent channels runs many of them, each wrapped in its own
//! `tokio::sync::Mutex`, rather than sharing one `Channel` across tasks.

mod envelope;
mod transport;

pub use envelope::{Request, Response, ResponseError, ResponseStatus};
pub use transport::{ChannelTransport, RetransmitPolicy, TransportError};

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::address::{role_of, Address, Role};
use crate::business::BusinessContext;
use crate::command::CommitStatus;
use crate::error::{ChannelError, CommandError, ProtocolError};
use crate::executor::Executor;
use crate::payment::PaymentCommand;
use crate::persist::ChannelPersister;
use crate::processor::{ObligationKey, ObligationLog, PaymentProcessor};

#[derive(Clone, Debug)]
struct OutgoingSlot {
    request: Request,
    response: Option<Response>,
}

#[derive(Clone, Debug)]
struct IncomingSlot {
    request: Request,
    response: Response,
}

/// Durable snapshot of a channel's request/response bookkeeping — the part
/// of a channel's persisted state that is specific to `Channel`
/// rather than to the [`Executor`] or [`PaymentProcessor`] underneath it
/// (each already `Serialize`/`Deserialize` in its own right; a host
/// reconstructs their state by replaying this snapshot's commands through a
/// fresh executor rather than this crate serializing executor internals
/// directly — see `DESIGN.md`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub my_requests: Vec<(Request, Option<Response>)>,
    pub other_requests: Vec<(Request, Response)>,
    pub pending_requests: Vec<Request>,
}

/// The per-(myself, other) channel. `B`/`O` parameterize the
/// [`PaymentProcessor`] underneath the executor; `Tr` is the network
/// transport; `Pr` is the durability boundary ([`ChannelPersister`]).
pub struct Channel<B, O, Tr, Pr> {
    myself: Address,
    other: Address,
    role: Role,
    my_requests: Vec<OutgoingSlot>,
    other_requests: Vec<IncomingSlot>,
    pending_requests: VecDeque<Request>,
    executor: Executor<crate::payment::PaymentObject, PaymentCommand, PaymentProcessor<B, O>>,
    followups: mpsc::UnboundedReceiver<(ObligationKey, PaymentCommand)>,
    transport: Tr,
    retransmit_policy: RetransmitPolicy,
    persister: Pr,
}

impl<B, O, Tr, Pr> Channel<B, O, Tr, Pr>
where
    B: BusinessContext + 'static,
    O: ObligationLog + 'static,
    Tr: ChannelTransport,
    Pr: ChannelPersister,
{
    /// Builds a brand-new channel with no prior history. Use [`Self::restore`]
    /// to reconstruct one from a previous [`ChannelPersister::load`].
    pub fn new(
        myself: Address,
        other: Address,
        business: Arc<B>,
        obligations: Arc<O>,
        transport: Tr,
        retransmit_policy: RetransmitPolicy,
        persister: Pr,
    ) -> Self {
        let (processor, followups) = PaymentProcessor::new(business, obligations);
        let role = role_of(&myself, &other);
        let executor = Executor::new(myself.clone(), other.clone(), processor);
        Self {
            myself,
            other,
            role,
            my_requests: Vec::new(),
            other_requests: Vec::new(),
            pending_requests: VecDeque::new(),
            executor,
            followups,
            transport,
            retransmit_policy,
            persister,
        }
    }

    /// Reconstructs a channel from whatever [`ChannelPersister::load`]
    /// returns, replaying the shared command sequence from the merged,
    /// `command_seq`-sorted union of both request queues' confirmed entries
    /// back through a fresh [`Executor`]. Falls back to [`Self::new`] when
    /// nothing has been persisted yet.
    #[instrument(skip(business, obligations, transport, persister))]
    pub async fn restore(
        myself: Address,
        other: Address,
        business: Arc<B>,
        obligations: Arc<O>,
        transport: Tr,
        retransmit_policy: RetransmitPolicy,
        persister: Pr,
    ) -> Result<Self, ChannelError> {
        let snapshot = persister
            .load(&myself, &other)
            .await
            .map_err(|e| ChannelError::Persist(anyhow::Error::new(e)))?;

        let Some(snapshot) = snapshot else {
            return Ok(Self::new(
                myself,
                other,
                business,
                obligations,
                transport,
                retransmit_policy,
                persister,
            ));
        };

        let (processor, followups) = PaymentProcessor::new(business, obligations);
        let role = role_of(&myself, &other);
        let mut executor = Executor::new(myself.clone(), other.clone(), processor);

        // Each confirmed slot's `command_seq` is globally unique and totally
        // ordered across both request queues; merging and sorting
        // replays the executor into exactly its pre-crash state without this
        // crate needing to serialize executor internals directly.
        let mut confirmed: Vec<(u64, PaymentCommand, Response)> = Vec::new();
        for (req, resp) in &snapshot.my_requests {
            if let Some(resp) = resp {
                if let Some(command_seq) = resp.command_seq {
                    confirmed.push((command_seq, req.command.clone(), resp.clone()));
                }
            }
        }
        for (req, resp) in &snapshot.other_requests {
            if let Some(command_seq) = resp.command_seq {
                confirmed.push((command_seq, req.command.clone(), resp.clone()));
            }
        }
        confirmed.sort_by_key(|(seq, _, _)| *seq);

        for (expected, (command_seq, command, resp)) in confirmed.into_iter().enumerate() {
            if command_seq != expected as u64 {
                return Err(ChannelError::ImpossibleCommandSeq {
                    got: command_seq,
                    ours: expected as u64,
                });
            }
            let outcome = executor
                .sequence_next_command(command, false)
                .map_err(ChannelError::Executor)?;
            match resp.status {
                ResponseStatus::Success => executor
                    .set_success(command_seq)
                    .map_err(ChannelError::Executor)?,
                ResponseStatus::Failure => {
                    let error = outcome.result.err().unwrap_or_else(|| CommandError::Remote {
                        code: resp
                            .error
                            .as_ref()
                            .map(|e| e.code.clone())
                            .unwrap_or_default(),
                    });
                    executor
                        .set_fail(command_seq, error)
                        .map_err(ChannelError::Executor)?;
                }
            }
        }

        let my_requests = snapshot
            .my_requests
            .into_iter()
            .map(|(request, response)| OutgoingSlot { request, response })
            .collect();
        let other_requests = snapshot
            .other_requests
            .into_iter()
            .map(|(request, response)| IncomingSlot { request, response })
            .collect();
        let pending_requests = snapshot.pending_requests.into_iter().collect();

        Ok(Self {
            myself,
            other,
            role,
            my_requests,
            other_requests,
            pending_requests,
            executor,
            followups,
            transport,
            retransmit_policy,
            persister,
        })
    }

    /// Snapshots current state through [`ChannelPersister::save`]. Called
    /// after every in-memory mutation and before the corresponding network
    /// send, so a crash never loses a commitment this side has already made.
    async fn persist(&self) -> Result<(), ChannelError> {
        let snapshot = self.snapshot();
        self.persister
            .save(&self.myself, &self.other, &snapshot)
            .await
            .map_err(|e| ChannelError::Persist(anyhow::Error::new(e)))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn my_next_seq(&self) -> u64 {
        self.my_requests.len() as u64
    }

    pub fn other_next_seq(&self) -> u64 {
        self.other_requests.len() as u64
    }

    pub fn executor(&self) -> &Executor<crate::payment::PaymentObject, PaymentCommand, PaymentProcessor<B, O>> {
        &self.executor
    }

    pub fn retransmit_policy(&self) -> &RetransmitPolicy {
        &self.retransmit_policy
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            my_requests: self
                .my_requests
                .iter()
                .map(|s| (s.request.clone(), s.response.clone()))
                .collect(),
            other_requests: self
                .other_requests
                .iter()
                .map(|s| (s.request.clone(), s.response.clone()))
                .collect(),
            pending_requests: self.pending_requests.iter().cloned().collect(),
        }
    }

    fn has_outstanding_own_request(&self) -> bool {
        self.my_requests.iter().any(|s| s.response.is_none())
    }

    /// Whether any of our own proposals is still awaiting a response —
    /// used by a host's retransmit watchdog.
    pub fn would_retransmit(&self) -> bool {
        self.has_outstanding_own_request()
    }

    /// Resends the earliest unanswered request, if any.
    #[instrument(skip(self))]
    pub async fn retransmit(&mut self) -> Result<(), ChannelError> {
        if let Some(slot) = self.my_requests.iter().find(|s| s.response.is_none()) {
            debug!(seq = slot.request.seq, "retransmitting");
            let req = slot.request.clone();
            self.transport.send_request(&self.other, req).await?;
        }
        Ok(())
    }

    /// Proposes `cmd` as our next request. If we're the server, we assign
    /// `command_seq` and sequence it speculatively (strict: a command we
    /// can't sequence ourselves never leaves this process); a client
    /// leaves `command_seq` unset for the server to fill in.
    #[instrument(skip(self, cmd))]
    pub async fn sequence_command_local(
        &mut self,
        cmd: PaymentCommand,
    ) -> Result<(), ChannelError> {
        let seq = self.my_next_seq();
        let command_seq = if self.role.is_server() {
            let position = self.executor.next_seq();
            self.executor
                .sequence_next_command(cmd.clone(), true)
                .map_err(ChannelError::Executor)?;
            Some(position)
        } else {
            None
        };
        let req = Request {
            seq,
            command_seq,
            command: cmd,
        };
        self.my_requests.push(OutgoingSlot {
            request: req.clone(),
            response: None,
        });
        self.persist().await?;
        self.transport.send_request(&self.other, req).await?;
        Ok(())
    }

    /// Processes an inbound request from the peer, sending the resulting
    /// response (or deferring it to `pending_requests` if we must drain our
    /// own outstanding proposal first).
    #[instrument(skip(self, req), fields(seq = req.seq))]
    pub async fn handle_request(&mut self, req: Request) -> Result<(), ChannelError> {
        if req.seq < self.other_next_seq() {
            let slot = &self.other_requests[req.seq as usize];
            let resp = if req.is_retransmit_of(&slot.request) {
                slot.response.clone()
            } else {
                warn!(seq = req.seq, "conflicting retransmit at this slot");
                Response::conflict(req.seq, slot.request.command.clone())
            };
            self.transport.send_response(&self.other, resp).await?;
            return Ok(());
        }

        if self.role.is_server() && req.command_seq.is_some() {
            let resp = Response::protocol_error(req.seq, ProtocolError::Malformed);
            self.transport.send_response(&self.other, resp).await?;
            return Ok(());
        }

        if self.role.is_server() && self.has_outstanding_own_request() {
            debug!(seq = req.seq, "deferring peer request until our own proposal resolves");
            self.pending_requests.push_back(req);
            self.persist().await?;
            return Ok(());
        }

        if req.seq > self.other_next_seq() {
            let resp = Response::protocol_error(req.seq, ProtocolError::Missing);
            self.transport.send_response(&self.other, resp).await?;
            return Ok(());
        }

        if self.role.is_client() {
            if let Some(command_seq) = req.command_seq {
                if command_seq > self.executor.next_seq() {
                    let resp = Response::protocol_error(req.seq, ProtocolError::Wait);
                    self.transport.send_response(&self.other, resp).await?;
                    return Ok(());
                }
            }
        }

        let position = self.executor.next_seq();
        if let Some(command_seq) = req.command_seq {
            debug_assert_eq!(
                command_seq, position,
                "peer-assigned command_seq must match our executor's next slot"
            );
        }

        let outcome = self
            .executor
            .sequence_next_command(req.command.clone(), false)
            .map_err(ChannelError::Executor)?;
        let (resp, succeeded) = match outcome.result {
            Ok(()) => {
                self.executor
                    .set_success(position)
                    .map_err(ChannelError::Executor)?;
                (Response::success(req.seq, position), true)
            }
            Err(e) => {
                self.executor
                    .set_fail(position, e.clone())
                    .map_err(ChannelError::Executor)?;
                (Response::command_failed(req.seq, position, &e), false)
            }
        };

        self.other_requests.push(IncomingSlot {
            request: req,
            response: resp.clone(),
        });
        self.persist().await?;
        self.transport.send_response(&self.other, resp).await?;
        // Peer-originated command just committed: run the business-driven
        // follow-up now that the response is on its way. A failed command
        // needs no further business processing.
        if succeeded {
            self.process_command_success_async(position).await;
        }
        self.drain_followups().await?;
        Ok(())
    }

    /// Processes an inbound response to one of our own requests.
    #[instrument(skip(self, resp), fields(seq = resp.seq))]
    pub async fn handle_response(&mut self, resp: Response) -> Result<(), ChannelError> {
        let idx = resp.seq as usize;
        if idx >= self.my_requests.len() {
            warn!(seq = resp.seq, "response for unknown request, ignoring");
            return Ok(());
        }
        if idx > 0 && self.my_requests[idx - 1].response.is_none() {
            return Err(ChannelError::OutOfOrderResponse);
        }
        if self.my_requests[idx].response.is_some() {
            debug!(seq = resp.seq, "duplicate response, ignoring");
            return Ok(());
        }

        if let Some(code) = resp.protocol_error_code() {
            match code {
                "wait" | "missing" => {
                    self.retransmit().await?;
                    return Ok(());
                }
                "conflict" => return Err(ChannelError::Protocol(ProtocolError::Conflict)),
                other => {
                    warn!(code = other, "peer reported a protocol error against our request");
                    return Ok(());
                }
            }
        }

        let command_seq = resp
            .command_seq
            .ok_or(ChannelError::UnknownResponse { seq: resp.seq })?;
        let next = self.executor.next_seq();

        if command_seq == next {
            let cmd = self.my_requests[idx].request.command.clone();
            let outcome = self
                .executor
                .sequence_next_command(cmd, false)
                .map_err(ChannelError::Executor)?;
            self.confirm(command_seq, &resp, outcome.result)?;
        } else if command_seq < next {
            self.confirm(command_seq, &resp, Ok(()))?;
        } else {
            return Err(ChannelError::ImpossibleCommandSeq {
                got: command_seq,
                ours: next,
            });
        }

        self.my_requests[idx].response = Some(resp);
        self.persist().await?;
        self.drain_followups().await?;
        self.drain_pending_requests().await?;
        Ok(())
    }

    /// Applies `resp`'s outcome to the slot we just sequenced (or had
    /// already sequenced, if we're the server). `local_check` is the
    /// result of our own re-derivation of the command's validity, used to
    /// populate `set_fail`'s error when we haven't already checked it
    /// ourselves (the `command_seq < next` branch, where sequencing — and
    /// therefore the locally-typed error — happened earlier).
    fn confirm(
        &mut self,
        command_seq: u64,
        resp: &Response,
        local_check: Result<(), CommandError>,
    ) -> Result<(), ChannelError> {
        match resp.status {
            ResponseStatus::Success => self
                .executor
                .set_success(command_seq)
                .map_err(ChannelError::Executor),
            ResponseStatus::Failure => {
                let error = local_check.err().unwrap_or_else(|| CommandError::Remote {
                    code: resp
                        .error
                        .as_ref()
                        .map(|e| e.code.clone())
                        .unwrap_or_default(),
                });
                self.executor
                    .set_fail(command_seq, error)
                    .map_err(ChannelError::Executor)
            }
        }
    }

    /// Once an outstanding own request resolves, lets a server catch up on
    /// any peer requests it had to defer while it held the next slot open
    /// for its own proposal.
    async fn drain_pending_requests(&mut self) -> Result<(), ChannelError> {
        while self.role.is_server() && !self.has_outstanding_own_request() {
            let Some(req) = self.pending_requests.pop_front() else {
                break;
            };
            self.handle_request(req).await?;
        }
        Ok(())
    }

    /// Drains follow-up commands the business layer queued (via
    /// [`PaymentProcessor::payment_process_async`]) after the command that
    /// was just confirmed, proposing each as a new local command in turn.
    ///
    /// The obligation behind each follow-up is released only once
    /// [`Self::sequence_command_local`] has durably sequenced it, not when
    /// the business layer merely handed it to the in-memory channel — a
    /// crash between those two points must still find the obligation on
    /// record so [`Self::retry_process_commands`] can re-emit it.
    async fn drain_followups(&mut self) -> Result<(), ChannelError> {
        while let Ok((key, cmd)) = self.followups.try_recv() {
            self.sequence_command_local(cmd).await?;
            self.executor.processor().release_obligation(&key);
        }
        Ok(())
    }

    /// Runs the business-driven follow-up for a just-committed peer
    /// command; only meaningful for peer-originated commands, since our own
    /// proposals already went through business review before being
    /// proposed.
    pub async fn process_command_success_async(&self, seq_no: u64) {
        let Some(command) = self.executor.command_at(seq_no) else {
            return;
        };
        if self.executor.status_at(seq_no) != Some(CommitStatus::Success) {
            return;
        }
        use crate::command::Command;
        if command.origin() == &self.myself {
            return;
        }
        let payment = command.payment().clone();
        self.executor
            .processor()
            .payment_process_async(&self.myself, &self.other, payment)
            .await;
    }

    /// Replays every obligation the [`PaymentProcessor`] still owes,
    /// queuing their follow-up commands (drained on the next
    /// `handle_request`/`handle_response`/explicit [`Self::flush_followups`]).
    pub async fn retry_process_commands(&self) {
        self.executor
            .processor()
            .retry_process_commands(&self.myself, &self.other)
            .await;
    }

    /// Proposes any follow-up commands already queued by the business
    /// layer without waiting for the next inbound message. A host calls
    /// this after [`Self::retry_process_commands`] on startup.
    pub async fn flush_followups(&mut self) -> Result<(), ChannelError> {
        self.drain_followups().await
    }
}
