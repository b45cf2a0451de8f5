//! The network transport boundary and the retransmit watchdog's tuning
//! knobs. Neither HTTP/TLS nor a scheduler live in this crate; this module
//! only defines what a host plugs in.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::address::Address;

use super::envelope::{Request, Response};

#[derive(Clone, Debug, Error)]
pub enum TransportError {
    #[error("send to {to} failed: {reason}")]
    SendFailed { to: String, reason: String },
}

/// Required external collaborator: ordered, best-effort, per-peer delivery.
/// The core does not prescribe an encoding or a reliability mechanism; it
/// only requires that sends are attributable to a peer and that failures
/// are reported rather than silently swallowed, since delivery failure is
/// what drives the retransmit watchdog.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send_request(&self, to: &Address, req: Request) -> Result<(), TransportError>;

    async fn send_response(&self, to: &Address, resp: Response) -> Result<(), TransportError>;
}

/// Tuning for the periodic retransmit watchdog. Scheduling
/// itself is a host-process concern — this crate only exposes
/// [`super::Channel::would_retransmit`] and [`super::Channel::retransmit`]
/// as plain methods a host calls on a timer built from this policy.
#[derive(Clone, Copy, Debug)]
pub struct RetransmitPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub watchdog_period: Duration,
}

impl Default for RetransmitPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            watchdog_period: Duration::from_secs(5),
        }
    }
}
