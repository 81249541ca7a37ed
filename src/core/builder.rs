//! Login input parsing
//!
//! [`LoginRequest`] mirrors the form fields sent by the admin UI, field
//! names included. [`DescriptorBuilder`] validates it and produces a
//! [`TopologyDescriptor`].

use super::{Endpoint, TlsOptions, Topology, TopologyDescriptor, TransportSecurity};
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Port used when a standalone login does not name one
pub const DEFAULT_PORT: u16 = 6379;

/// A numeric form field that may arrive as a JSON number or as text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericField {
    Integer(i64),
    Float(f64),
    Text(String),
    /// Any other JSON value; always rejected by validation
    Other(serde_json::Value),
}

impl NumericField {
    /// `None` for blank text, `Some(Err(()))` for anything non-numeric or negative
    fn as_u64(&self) -> Option<Result<u64, ()>> {
        match self {
            NumericField::Integer(n) => Some(u64::try_from(*n).map_err(|_| ())),
            NumericField::Float(f) => {
                if f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64 {
                    Some(Ok(*f as u64))
                } else {
                    Some(Err(()))
                }
            }
            NumericField::Text(s) if s.trim().is_empty() => None,
            NumericField::Text(s) => Some(s.trim().parse::<u64>().map_err(|_| ())),
            NumericField::Other(_) => Some(Err(())),
        }
    }
}

impl From<u32> for NumericField {
    fn from(value: u32) -> Self {
        NumericField::Integer(i64::from(value))
    }
}

/// Raw body of a login or database-detection request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "serverType")]
    pub server_type: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub port: Option<NumericField>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "dbIndex")]
    pub db_index: Option<NumericField>,

    #[serde(default)]
    pub sentinels: Option<String>,
    #[serde(default, rename = "sentinelName")]
    pub sentinel_name: Option<String>,
    #[serde(default, rename = "sentinelPWType")]
    pub sentinel_pw_type: Option<String>,
    #[serde(default, rename = "sentinelPassword")]
    pub sentinel_password: Option<String>,
    #[serde(default, rename = "sentinelTLS")]
    pub sentinel_tls: Option<String>,
    #[serde(default, rename = "sentinelTLSCA")]
    pub sentinel_tls_ca: Option<String>,
    #[serde(default, rename = "sentinelTLSPublicKey")]
    pub sentinel_tls_public_key: Option<String>,
    #[serde(default, rename = "sentinelTLSPrivateKey")]
    pub sentinel_tls_private_key: Option<String>,
    #[serde(default, rename = "sentinelTLSServerName")]
    pub sentinel_tls_server_name: Option<String>,

    #[serde(default)]
    pub clusters: Option<String>,

    #[serde(default, rename = "redisTLS")]
    pub redis_tls: Option<String>,
    /// Checkbox: only its presence matters
    #[serde(default, rename = "clusterNoTlsValidation")]
    pub cluster_no_tls_validation: Option<serde_json::Value>,
    #[serde(default, rename = "redisTLSCA")]
    pub redis_tls_ca: Option<String>,
    #[serde(default, rename = "redisTLSPublicKey")]
    pub redis_tls_public_key: Option<String>,
    #[serde(default, rename = "redisTLSPrivateKey")]
    pub redis_tls_private_key: Option<String>,
    #[serde(default, rename = "redisTLSServerName")]
    pub redis_tls_server_name: Option<String>,
}

/// TLS fields of one side (main connection or sentinels) of a request
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsFields<'a> {
    pub mode: Option<&'a str>,
    pub ca: Option<&'a str>,
    pub cert: Option<&'a str>,
    pub key: Option<&'a str>,
    pub server_name: Option<&'a str>,
}

/// Turns `"yes"` / `"custom"` TLS selectors into a [`TransportSecurity`]
pub struct TransportSecurityResolver;

impl TransportSecurityResolver {
    pub fn resolve(fields: TlsFields<'_>) -> Option<TransportSecurity> {
        match fields.mode {
            Some("yes") => Some(TransportSecurity::Defaults),
            Some("custom") => Some(TransportSecurity::Custom(TlsOptions {
                ca: non_blank(fields.ca).map(unescape_newlines),
                cert: non_blank(fields.cert).map(unescape_newlines),
                key: non_blank(fields.key).map(unescape_newlines),
                server_name: non_blank(fields.server_name).map(unescape_newlines),
            })),
            _ => None,
        }
    }
}

/// Validates a [`LoginRequest`] and builds the descriptor it describes
pub struct DescriptorBuilder;

impl DescriptorBuilder {
    pub fn build(request: &LoginRequest) -> Result<TopologyDescriptor, ValidationError> {
        let db_index = parse_db_index(request.db_index.as_ref())?;
        let topology = Self::topology(request)?;

        let tls = TransportSecurityResolver::resolve(TlsFields {
            mode: request.redis_tls.as_deref(),
            ca: request.redis_tls_ca.as_deref(),
            cert: request.redis_tls_public_key.as_deref(),
            key: request.redis_tls_private_key.as_deref(),
            server_name: request.redis_tls_server_name.as_deref(),
        });
        let cluster_skip_cert_validation =
            tls.is_some() && request.cluster_no_tls_validation.is_some();

        let label = match non_blank(request.label.as_deref()) {
            Some(label) => label.to_string(),
            None => topology.display_host().to_string(),
        };

        Ok(TopologyDescriptor {
            label,
            topology,
            username: non_blank(request.username.as_deref()).map(str::to_string),
            password: non_blank(request.password.as_deref()).map(str::to_string),
            db_index,
            tls,
            cluster_skip_cert_validation,
        })
    }

    fn topology(request: &LoginRequest) -> Result<Topology, ValidationError> {
        match request.server_type.as_deref() {
            Some("sentinel") => {
                let sentinels = parse_server_list("sentinels", request.sentinels.as_deref())?;
                let sentinel_name = non_blank(request.sentinel_name.as_deref())
                    .ok_or(ValidationError::MissingSentinelName)?
                    .to_string();
                let sentinel_password = match request.sentinel_pw_type.as_deref() {
                    Some("sentinel") => non_blank(request.sentinel_password.as_deref()),
                    Some("redis") => non_blank(request.password.as_deref()),
                    _ => None,
                }
                .map(str::to_string);
                let sentinel_tls = TransportSecurityResolver::resolve(TlsFields {
                    mode: request.sentinel_tls.as_deref(),
                    ca: request.sentinel_tls_ca.as_deref(),
                    cert: request.sentinel_tls_public_key.as_deref(),
                    key: request.sentinel_tls_private_key.as_deref(),
                    server_name: request.sentinel_tls_server_name.as_deref(),
                });

                Ok(Topology::Sentinel {
                    sentinels,
                    sentinel_name,
                    sentinel_password,
                    sentinel_tls,
                })
            }
            Some("cluster") => Ok(Topology::Cluster {
                clusters: parse_server_list("clusters", request.clusters.as_deref())?,
            }),
            _ => match non_blank(request.hostname.as_deref()) {
                Some(path) if path.starts_with('/') => Ok(Topology::Socket {
                    path: path.to_string(),
                }),
                Some(host) => Ok(Topology::Standalone {
                    host: host.to_string(),
                    port: parse_port(request.port.as_ref())?,
                }),
                None => Err(ValidationError::MissingTarget),
            },
        }
    }
}

/// Parse a comma separated `host:port` list.
///
/// Blank entries are skipped; an IPv6 host must be bracketed.
pub fn parse_server_list(
    list: &'static str,
    raw: Option<&str>,
) -> Result<Vec<Endpoint>, ValidationError> {
    let mut endpoints = Vec::new();

    for entry in raw.unwrap_or("").split(',').map(str::trim) {
        if entry.is_empty() {
            continue;
        }
        let invalid = || ValidationError::InvalidEndpoint {
            list,
            entry: entry.to_string(),
        };

        let (host, port) = entry.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() || (host.contains(':') && !entry.starts_with('[')) {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        endpoints.push(Endpoint::new(host, port));
    }

    if endpoints.is_empty() {
        return Err(ValidationError::EmptyEndpointList(list));
    }
    Ok(endpoints)
}

/// Replace literal `\n` sequences (backslash, `n`) with line breaks
pub fn unescape_newlines(value: &str) -> String {
    value.replace("\\n", "\n")
}

fn parse_db_index(field: Option<&NumericField>) -> Result<u32, ValidationError> {
    match field.and_then(NumericField::as_u64) {
        None => Ok(0),
        Some(Ok(n)) => u32::try_from(n).map_err(|_| ValidationError::InvalidDbIndex),
        Some(Err(())) => Err(ValidationError::InvalidDbIndex),
    }
}

fn parse_port(field: Option<&NumericField>) -> Result<u16, ValidationError> {
    let invalid = || {
        ValidationError::InvalidPort(match field {
            Some(NumericField::Integer(n)) => n.to_string(),
            Some(NumericField::Float(f)) => f.to_string(),
            Some(NumericField::Text(s)) => s.clone(),
            Some(NumericField::Other(value)) => value.to_string(),
            None => String::new(),
        })
    };

    match field.and_then(NumericField::as_u64) {
        None => Ok(DEFAULT_PORT),
        Some(Ok(n)) => match u16::try_from(n) {
            Ok(0) | Err(_) => Err(invalid()),
            Ok(port) => Ok(port),
        },
        Some(Err(())) => Err(invalid()),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
