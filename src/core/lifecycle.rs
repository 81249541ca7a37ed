//! Connection attempt lifecycle
//!
//! A transport may emit several events for one attempt (an error after
//! ready, repeated errors while it retries). The coordinator turns that
//! stream into exactly one outcome, `Connecting -> Ready | Failed`,
//! delivered over a oneshot channel. Whoever ends up owning a handle that
//! nobody wants anymore (failed attempt, caller gone) disconnects it.

use crate::core::TopologyDescriptor;
use crate::error::TransportError;
use crate::transport::{ConnectionHandle, Connector, PendingConnection, TransportEvent};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Terminal state reached by one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Connecting,
    Ready,
    Failed,
}

/// Single-shot outcome of a connection attempt
pub type AttemptOutcome<H> = Result<H, TransportError>;

/// Drives connection attempts to a single reported outcome
#[derive(Debug, Clone)]
pub struct ConnectionLifecycleCoordinator {
    connect_timeout: Duration,
}

impl ConnectionLifecycleCoordinator {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Start connecting `descriptor`. The receiver yields exactly one outcome.
    pub async fn start<C: Connector>(
        &self,
        connector: &C,
        descriptor: &TopologyDescriptor,
    ) -> oneshot::Receiver<AttemptOutcome<C::Handle>> {
        let (reply, outcome) = oneshot::channel();

        match connector.connect(descriptor).await {
            Ok(pending) => {
                tokio::spawn(drive(pending, reply, self.connect_timeout));
            }
            Err(e) => {
                // Nothing was opened, so there is nothing to disconnect.
                let _ = reply.send(Err(e));
            }
        }

        outcome
    }

    /// Connect and wait for the outcome.
    ///
    /// Dropping this future before it resolves is safe: the coordinator then
    /// disconnects the handle itself.
    pub async fn establish<C: Connector>(
        &self,
        connector: &C,
        descriptor: &TopologyDescriptor,
    ) -> AttemptOutcome<C::Handle> {
        self.start(connector, descriptor)
            .await
            .await
            .unwrap_or(Err(TransportError::Closed))
    }
}

/// Wait for the first terminal event and report it once
async fn drive<H: ConnectionHandle>(
    pending: PendingConnection<H>,
    mut reply: oneshot::Sender<AttemptOutcome<H>>,
    connect_timeout: Duration,
) -> AttemptState {
    let PendingConnection { handle, mut events } = pending;

    let first_event = tokio::select! {
        event = timeout(connect_timeout, events.recv()) => Some(event),
        _ = reply.closed() => None,
    };
    // Later events for this attempt are never read.
    drop(events);

    let result = match first_event {
        None => {
            debug!("Caller went away while connecting, disconnecting");
            handle.disconnect().await;
            return AttemptState::Failed;
        }
        Some(Ok(Some(TransportEvent::Ready))) => Ok(()),
        Some(Ok(Some(TransportEvent::Error(e)))) => Err(e),
        Some(Ok(None)) => Err(TransportError::Closed),
        Some(Err(_)) => Err(TransportError::timeout("connect")),
    };

    match result {
        Ok(()) => {
            if let Err(Ok(orphan)) = reply.send(Ok(handle)) {
                warn!("Connection became ready after its caller gave up, disconnecting");
                orphan.disconnect().await;
            }
            AttemptState::Ready
        }
        Err(cause) => {
            handle.disconnect().await;
            if let Err(Err(cause)) = reply.send(Err(cause)) {
                debug!("Connection failed after its caller gave up: {}", cause);
            }
            AttemptState::Failed
        }
    }
}
