//! Redis transport
//!
//! The core only sees the [`Connector`] and [`ConnectionHandle`] traits:
//! a connector opens a handle and reports its lifecycle through a stream of
//! [`TransportEvent`]s, a handle runs commands and can be disconnected.
//! [`client::RespConnector`] is the production implementation speaking RESP
//! over TCP, Unix sockets or TLS.
pub mod client;
pub mod resp;
pub mod tls;

use crate::core::TopologyDescriptor;
use crate::error::TransportError;
use async_trait::async_trait;
use resp::RespValue;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lifecycle notification emitted by a connecting handle
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is usable
    Ready,
    /// The connection failed (refused, reset, bad credentials, DNS...)
    Error(TransportError),
}

/// A handle whose connection is still being established
pub struct PendingConnection<H> {
    pub handle: H,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Live (or connecting) connection to a Redis deployment
#[async_trait]
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Run one command, e.g. `&["INFO", "keyspace"]`
    async fn call(&self, args: &[&str]) -> Result<RespValue, TransportError>;

    /// Close the connection. Safe to call on a handle that never became ready.
    async fn disconnect(&self);
}

/// Opens connections described by a [`TopologyDescriptor`]
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: ConnectionHandle;

    /// Start connecting. Readiness and failures arrive on the returned event stream;
    /// an `Err` here means the attempt could not even be started.
    async fn connect(
        &self,
        descriptor: &TopologyDescriptor,
    ) -> Result<PendingConnection<Self::Handle>, TransportError>;

    /// Upper bound applied to every command
    fn command_timeout(&self) -> Duration;
}
