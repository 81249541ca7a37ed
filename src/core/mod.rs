//! Connection descriptors and the machinery built around them
//!
//! A [`TopologyDescriptor`] is the normalized, validated identity of one
//! Redis connection request. The submodules turn raw login input into
//! descriptors, track live connections per descriptor identity, drive
//! connection attempts and probe servers for database usage.
pub mod builder;
pub mod lifecycle;
pub mod probe;
pub mod registry;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A `host:port` pair of a sentinel or cluster seed node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Deployment shape of the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Topology {
    /// Single server reached over TCP
    Standalone { host: String, port: u16 },
    /// Single server reached over a Unix-domain socket
    Socket { path: String },
    /// Primary resolved through a sentinel group
    Sentinel {
        sentinels: Vec<Endpoint>,
        sentinel_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sentinel_password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sentinel_tls: Option<TransportSecurity>,
    },
    /// Sharded cluster reached through its seed nodes
    Cluster { clusters: Vec<Endpoint> },
}

/// Discriminant of [`Topology`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    Standalone,
    Socket,
    Sentinel,
    Cluster,
}

impl TopologyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyKind::Standalone => "standalone",
            TopologyKind::Socket => "socket",
            TopologyKind::Sentinel => "sentinel",
            TopologyKind::Cluster => "cluster",
        }
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Topology {
    pub fn kind(&self) -> TopologyKind {
        match self {
            Topology::Standalone { .. } => TopologyKind::Standalone,
            Topology::Socket { .. } => TopologyKind::Socket,
            Topology::Sentinel { .. } => TopologyKind::Sentinel,
            Topology::Cluster { .. } => TopologyKind::Cluster,
        }
    }

    /// Host shown to operators: the socket path, the first sentinel or
    /// cluster node, or the standalone host.
    pub fn display_host(&self) -> &str {
        match self {
            Topology::Standalone { host, .. } => host,
            Topology::Socket { path } => path,
            Topology::Sentinel { sentinels, .. } => {
                sentinels.first().map(|e| e.host.as_str()).unwrap_or("")
            }
            Topology::Cluster { clusters } => {
                clusters.first().map(|e| e.host.as_str()).unwrap_or("")
            }
        }
    }

    /// Port shown to operators; only TCP shapes have one
    pub fn display_port(&self) -> Option<u16> {
        match self {
            Topology::Standalone { port, .. } => Some(*port),
            Topology::Socket { .. } => None,
            Topology::Sentinel { sentinels, .. } => sentinels.first().map(|e| e.port),
            Topology::Cluster { clusters } => clusters.first().map(|e| e.port),
        }
    }
}

/// PEM material and overrides for a custom TLS setup.
///
/// Newlines are stored as real line breaks.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("ca", &self.ca.as_ref().map(|_| "<pem>"))
            .field("cert", &self.cert.as_ref().map(|_| "<pem>"))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Transport security of a connection (or of its sentinels)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TlsSetting", into = "TlsSetting")]
pub enum TransportSecurity {
    /// TLS with the default trust roots and no client certificate
    Defaults,
    /// TLS with operator supplied material
    Custom(TlsOptions),
}

/// Persisted form: `tls = true` or a `[tls]` table
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TlsSetting {
    Enabled(bool),
    Custom(TlsOptions),
}

impl TryFrom<TlsSetting> for TransportSecurity {
    type Error = String;

    fn try_from(setting: TlsSetting) -> Result<Self, Self::Error> {
        match setting {
            TlsSetting::Enabled(true) => Ok(TransportSecurity::Defaults),
            TlsSetting::Enabled(false) => {
                Err("tls = false is not allowed, omit the field instead".to_string())
            }
            TlsSetting::Custom(options) => Ok(TransportSecurity::Custom(options)),
        }
    }
}

impl From<TransportSecurity> for TlsSetting {
    fn from(security: TransportSecurity) -> Self {
        match security {
            TransportSecurity::Defaults => TlsSetting::Enabled(true),
            TransportSecurity::Custom(options) => TlsSetting::Custom(options),
        }
    }
}

impl TransportSecurity {
    /// Custom options, if any
    pub fn options(&self) -> Option<&TlsOptions> {
        match self {
            TransportSecurity::Defaults => None,
            TransportSecurity::Custom(options) => Some(options),
        }
    }
}

/// Normalized identity and credentials of one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDescriptor {
    pub label: String,
    pub topology: Topology,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub db_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TransportSecurity>,
    #[serde(default)]
    pub cluster_skip_cert_validation: bool,
}

impl TopologyDescriptor {
    pub fn kind(&self) -> TopologyKind {
        self.topology.kind()
    }

    /// Same descriptor pointed at another logical database
    pub fn with_db_index(mut self, db_index: u32) -> Self {
        self.db_index = db_index;
        self
    }

    pub fn identity(&self) -> ConnectionIdentity {
        let (targets, sentinel_name) = match &self.topology {
            Topology::Standalone { host, port } => {
                (vec![Endpoint::new(host.clone(), *port).to_string()], None)
            }
            Topology::Socket { path } => (vec![path.clone()], None),
            Topology::Sentinel {
                sentinels,
                sentinel_name,
                ..
            } => (
                sentinels.iter().map(Endpoint::to_string).collect(),
                Some(sentinel_name.clone()),
            ),
            Topology::Cluster { clusters } => {
                (clusters.iter().map(Endpoint::to_string).collect(), None)
            }
        };

        ConnectionIdentity {
            kind: self.kind(),
            targets,
            sentinel_name,
            username: self.username.clone(),
            db_index: self.db_index,
        }
    }

    /// True when both descriptors name the same logical connection
    pub fn same_identity(&self, other: &TopologyDescriptor) -> bool {
        self.identity() == other.identity()
    }

    /// Opaque id used to address the connection on logout
    pub fn connection_id(&self) -> String {
        self.identity().connection_id()
    }

    /// `"<topology> <host>"`, as reported by the database probe
    pub fn server_display(&self) -> String {
        format!("{} {}", self.kind(), self.topology.display_host())
    }

    /// Password-free view for listings
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            connection_id: self.connection_id(),
            label: self.label.clone(),
            topology: self.kind(),
            host: self.topology.display_host().to_string(),
            port: self.topology.display_port(),
            db_index: self.db_index,
            tls: self.tls.is_some(),
        }
    }
}

/// Fields that decide whether two descriptors are the same connection.
///
/// Password, label and TLS material are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    kind: TopologyKind,
    targets: Vec<String>,
    sentinel_name: Option<String>,
    username: Option<String>,
    db_index: u32,
}

impl ConnectionIdentity {
    /// Canonical textual key, e.g. `standalone|127.0.0.1:6379||default|0`
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.kind,
            self.targets.join(","),
            self.sentinel_name.as_deref().unwrap_or(""),
            self.username.as_deref().unwrap_or(""),
            self.db_index
        )
    }

    pub fn connection_id(&self) -> String {
        let digest = Sha256::digest(self.key().as_bytes());
        hex::encode(&digest[..8])
    }
}

/// Display-safe description of a registered connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub connection_id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub topology: TopologyKind,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub db_index: u32,
    pub tls: bool,
}
