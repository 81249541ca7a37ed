//! RESP client over TCP, Unix sockets and TLS
//!
//! [`RespConnector::connect`] returns immediately with a [`RespClient`] in
//! the connecting state and establishes the link in a background task:
//! resolving the sentinel primary or a reachable cluster seed, running the
//! TLS handshake, authenticating and selecting the database. The outcome is
//! reported on the event channel.

use super::resp::{RespEncoder, RespParser, RespValue};
use super::tls::TlsSettings;
use super::{ConnectionHandle, Connector, PendingConnection, TransportEvent};
use crate::core::{Endpoint, Topology, TopologyDescriptor};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Time granted to `QUIT` before the socket is simply closed
const QUIT_GRACE: Duration = Duration::from_millis(250);

trait RedisStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RedisStream for T {}

/// One established, request/response RESP link
struct Connection {
    stream: Box<dyn RedisStream>,
    buffer: BytesMut,
}

impl Connection {
    fn new(stream: Box<dyn RedisStream>) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Send one command and read its reply. Error replies become `TransportError::Server`.
    async fn request(&mut self, args: &[&str]) -> Result<RespValue, TransportError> {
        let frame = RespEncoder::encode(&RespEncoder::command(args));
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;

        loop {
            let parsed = RespParser::parse(&mut self.buffer)
                .map_err(|e| TransportError::protocol(e.to_string()))?;
            match parsed {
                Some(RespValue::Error(message)) => return Err(TransportError::Server(message)),
                Some(value) => return Ok(value),
                None => {
                    if self.stream.read_buf(&mut self.buffer).await? == 0 {
                        return Err(TransportError::Closed);
                    }
                }
            }
        }
    }

    async fn close(mut self) {
        let _ = timeout(QUIT_GRACE, self.request(&["QUIT"])).await;
        let _ = self.stream.shutdown().await;
    }
}

enum ClientState {
    Connecting,
    Open(Connection),
    Closed,
}

/// Handle returned by [`RespConnector`]
pub struct RespClient {
    state: Arc<Mutex<ClientState>>,
    command_timeout: Duration,
}

#[async_trait]
impl ConnectionHandle for RespClient {
    async fn call(&self, args: &[&str]) -> Result<RespValue, TransportError> {
        let mut state = self.state.lock().await;
        let ClientState::Open(connection) = &mut *state else {
            return Err(TransportError::Closed);
        };

        let outcome = timeout(self.command_timeout, connection.request(args)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                // The late reply would desynchronize the stream; drop the link.
                *state = ClientState::Closed;
                Err(TransportError::timeout(args.first().copied().unwrap_or("command")))
            }
        }
    }

    async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.state.lock().await, ClientState::Closed);
        if let ClientState::Open(connection) = previous {
            connection.close().await;
        }
    }
}

/// Production [`Connector`] speaking RESP2
#[derive(Debug, Clone)]
pub struct RespConnector {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl RespConnector {
    pub fn new(connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout,
        }
    }
}

impl Default for RespConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for RespConnector {
    type Handle = RespClient;

    async fn connect(
        &self,
        descriptor: &TopologyDescriptor,
    ) -> Result<PendingConnection<RespClient>, TransportError> {
        let plan = ConnectPlan::new(descriptor, self.connect_timeout, self.command_timeout)?;
        let state = Arc::new(Mutex::new(ClientState::Connecting));
        let (events, rx) = mpsc::channel(1);

        let task_state = Arc::clone(&state);
        tokio::spawn(async move {
            let event = match plan.establish().await {
                Ok(connection) => {
                    let mut state = task_state.lock().await;
                    if matches!(*state, ClientState::Connecting) {
                        *state = ClientState::Open(connection);
                        TransportEvent::Ready
                    } else {
                        drop(state);
                        connection.close().await;
                        TransportEvent::Error(TransportError::Closed)
                    }
                }
                Err(e) => TransportEvent::Error(e),
            };
            if events.send(event).await.is_err() {
                debug!("Connection attempt finished after its caller went away");
            }
        });

        Ok(PendingConnection {
            handle: RespClient {
                state,
                command_timeout: self.command_timeout,
            },
            events: rx,
        })
    }

    fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}

/// Everything needed to open one connection, resolved up front
struct ConnectPlan {
    descriptor: TopologyDescriptor,
    tls: Option<TlsSettings>,
    sentinel_tls: Option<TlsSettings>,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl ConnectPlan {
    fn new(
        descriptor: &TopologyDescriptor,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let tls = descriptor
            .tls
            .as_ref()
            .map(|security| {
                TlsSettings::from_security(security, descriptor.cluster_skip_cert_validation)
            })
            .transpose()?;
        let sentinel_tls = match &descriptor.topology {
            Topology::Sentinel {
                sentinel_tls: Some(security),
                ..
            } => Some(TlsSettings::from_security(security, false)?),
            _ => None,
        };

        Ok(Self {
            descriptor: descriptor.clone(),
            tls,
            sentinel_tls,
            connect_timeout,
            command_timeout,
        })
    }

    async fn establish(&self) -> Result<Connection, TransportError> {
        match &self.descriptor.topology {
            Topology::Standalone { host, port } => {
                let mut connection = self.open_tcp(host, *port, self.tls.as_ref()).await?;
                self.handshake(&mut connection, true).await?;
                Ok(connection)
            }
            Topology::Socket { path } => {
                let mut connection = self.open_unix(path).await?;
                self.handshake(&mut connection, true).await?;
                Ok(connection)
            }
            Topology::Sentinel {
                sentinels,
                sentinel_name,
                sentinel_password,
                ..
            } => {
                let master = self
                    .resolve_master(sentinels, sentinel_name, sentinel_password.as_deref())
                    .await?;
                info!("Sentinel group {} reports primary at {}", sentinel_name, master);
                let mut connection = self
                    .open_tcp(&master.host, master.port, self.tls.as_ref())
                    .await?;
                self.handshake(&mut connection, true).await?;
                Ok(connection)
            }
            Topology::Cluster { clusters } => {
                let mut last_error = TransportError::Closed;
                for seed in clusters {
                    let attempt = async {
                        let mut connection =
                            self.open_tcp(&seed.host, seed.port, self.tls.as_ref()).await?;
                        // Cluster nodes only serve database 0
                        self.handshake(&mut connection, false).await?;
                        Ok::<_, TransportError>(connection)
                    };
                    match attempt.await {
                        Ok(connection) => return Ok(connection),
                        Err(e) => {
                            warn!("Cluster seed {} unusable: {}", seed, e);
                            last_error = e;
                        }
                    }
                }
                Err(last_error)
            }
        }
    }

    async fn open_tcp(
        &self,
        host: &str,
        port: u16,
        tls: Option<&TlsSettings>,
    ) -> Result<Connection, TransportError> {
        debug!("Connecting to {}:{}", host, port);
        let stream = timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::timeout(format!("connect to {host}:{port}")))??;
        stream.set_nodelay(true)?;

        match tls {
            Some(settings) => {
                let stream = timeout(self.connect_timeout, settings.handshake(host, stream))
                    .await
                    .map_err(|_| TransportError::timeout(format!("TLS handshake with {host}")))??;
                Ok(Connection::new(Box::new(stream)))
            }
            None => Ok(Connection::new(Box::new(stream))),
        }
    }

    #[cfg(unix)]
    async fn open_unix(&self, path: &str) -> Result<Connection, TransportError> {
        debug!("Connecting to socket {}", path);
        let stream = timeout(self.connect_timeout, tokio::net::UnixStream::connect(path))
            .await
            .map_err(|_| TransportError::timeout(format!("connect to {path}")))??;
        Ok(Connection::new(Box::new(stream)))
    }

    #[cfg(not(unix))]
    async fn open_unix(&self, path: &str) -> Result<Connection, TransportError> {
        Err(TransportError::Unsupported(format!(
            "unix sockets are not available on this platform: {path}"
        )))
    }

    async fn handshake(&self, connection: &mut Connection, select: bool) -> Result<(), TransportError> {
        timeout(
            self.command_timeout,
            authenticate_and_select(connection, &self.descriptor, select),
        )
        .await
        .map_err(|_| TransportError::timeout("handshake"))?
    }

    /// Ask each sentinel in turn for the current primary of `group`
    async fn resolve_master(
        &self,
        sentinels: &[Endpoint],
        group: &str,
        password: Option<&str>,
    ) -> Result<Endpoint, TransportError> {
        for sentinel in sentinels {
            let attempt = async {
                let mut connection = self
                    .open_tcp(&sentinel.host, sentinel.port, self.sentinel_tls.as_ref())
                    .await?;
                let reply = timeout(self.command_timeout, async {
                    if let Some(password) = password {
                        connection.request(&["AUTH", password]).await?;
                    }
                    connection
                        .request(&["SENTINEL", "get-master-addr-by-name", group])
                        .await
                })
                .await
                .map_err(|_| TransportError::timeout("SENTINEL get-master-addr-by-name"))??;
                connection.close().await;
                parse_master_addr(&reply)
            };

            match attempt.await {
                Ok(master) => return Ok(master),
                Err(e) => warn!("Sentinel {} could not resolve {}: {}", sentinel, group, e),
            }
        }

        Err(TransportError::NoSentinel {
            group: group.to_string(),
        })
    }
}

async fn authenticate_and_select(
    connection: &mut Connection,
    descriptor: &TopologyDescriptor,
    select: bool,
) -> Result<(), TransportError> {
    match (descriptor.username.as_deref(), descriptor.password.as_deref()) {
        (Some(username), Some(password)) => {
            connection.request(&["AUTH", username, password]).await?;
        }
        (None, Some(password)) => {
            connection.request(&["AUTH", password]).await?;
        }
        _ => {}
    }

    if select && descriptor.db_index != 0 {
        let db = descriptor.db_index.to_string();
        connection.request(&["SELECT", &db]).await?;
    }
    Ok(())
}

/// `SENTINEL get-master-addr-by-name` answers `[host, port]` or a null array
fn parse_master_addr(reply: &RespValue) -> Result<Endpoint, TransportError> {
    let fields = reply
        .as_array()
        .ok_or_else(|| TransportError::protocol("sentinel does not know this master group"))?;
    match fields {
        [host, port] => {
            let host = host
                .as_text()
                .ok_or_else(|| TransportError::protocol("master host is not a string"))?;
            let port = port
                .as_text()
                .and_then(|p| p.parse::<u16>().ok())
                .ok_or_else(|| TransportError::protocol("master port is not a number"))?;
            Ok(Endpoint::new(host, port))
        }
        _ => Err(TransportError::protocol(format!(
            "unexpected master address reply with {} fields",
            fields.len()
        ))),
    }
}
