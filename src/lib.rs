//! Portero - connection manager for Redis deployments
//!
//! Portero registers, reuses, probes and tears down operator connections to
//! Redis servers of four shapes:
//! 1. Standalone: a single server reached over TCP
//! 2. Socket: a local server reached through a Unix domain socket
//! 3. Sentinel: a monitored group whose master is resolved through sentinels
//! 4. Cluster: a sharded cluster reached through its seed nodes
//!
//! Any of them may be reached over TLS. Login input is normalized into a
//! [`core::TopologyDescriptor`], live connections are kept at most once per
//! identity in a [`core::registry::ConnectionRegistry`], and
//! [`core::probe::DatabaseProbe`] discovers which logical databases hold keys.

pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod service;
pub mod store;
pub mod transport;

pub use crate::core::builder::{DescriptorBuilder, LoginRequest};
pub use crate::core::TopologyDescriptor;
pub use crate::error::{PorteroError, PorteroResult};
pub use crate::service::AdminService;
