//! Database discovery probe
//!
//! Opens a throwaway connection to database 0, asks the server which
//! databases hold keys (`INFO keyspace`) and how many it allows
//! (`CONFIG GET databases`), then always disconnects. Both commands run
//! concurrently and both are waited for; the keyspace answer is required,
//! the ceiling falls back to a default because many deployments forbid
//! `CONFIG`.

use super::lifecycle::ConnectionLifecycleCoordinator;
use super::{Topology, TopologyDescriptor};
use crate::error::{ProbeError, TransportError};
use crate::transport::resp::RespValue;
use crate::transport::{ConnectionHandle, Connector};
use futures::future::join;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Ceiling assumed when the server will not tell
pub const DEFAULT_DATABASE_CEILING: u32 = 16;

/// Keys held by one logical database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUsage {
    pub db_index: u32,
    pub keys: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// e.g. `"standalone 127.0.0.1"`
    pub server: String,
    pub used: Vec<DatabaseUsage>,
    pub max: u32,
}

/// What a failed diagnostic does to the whole probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPolicy<T> {
    /// The probe fails with this command's error
    Fatal,
    /// The failure is logged and the default is used instead
    TolerateWithDefault(T),
}

/// One diagnostic command and its failure policy
struct DiagnosticSlot<T> {
    name: &'static str,
    policy: SlotPolicy<T>,
}

impl<T: Copy> DiagnosticSlot<T> {
    fn settle(&self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        match (result, self.policy) {
            (Ok(value), _) => Ok(value),
            (Err(e), SlotPolicy::Fatal) => {
                warn!("Error calling {} to get all databases used: {}", self.name, e);
                Err(e)
            }
            (Err(e), SlotPolicy::TolerateWithDefault(default)) => {
                info!("Cannot query {}, using default instead: {}", self.name, e);
                Ok(default)
            }
        }
    }
}

/// Disconnects the probe connection even when the probe future is dropped
struct Teardown<H: ConnectionHandle>(Option<Arc<H>>);

impl<H: ConnectionHandle> Teardown<H> {
    async fn finish(mut self) {
        if let Some(handle) = self.0.take() {
            handle.disconnect().await;
        }
    }
}

impl<H: ConnectionHandle> Drop for Teardown<H> {
    fn drop(&mut self) {
        let Some(handle) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { handle.disconnect().await });
            }
            Err(_) => warn!("No runtime left to close an abandoned probe connection"),
        }
    }
}

/// Discovers database usage and limits of a deployment
pub struct DatabaseProbe<C> {
    connector: Arc<C>,
    lifecycle: ConnectionLifecycleCoordinator,
    default_ceiling: u32,
}

impl<C: Connector> DatabaseProbe<C> {
    pub fn new(
        connector: Arc<C>,
        lifecycle: ConnectionLifecycleCoordinator,
        default_ceiling: u32,
    ) -> Self {
        Self {
            connector,
            lifecycle,
            default_ceiling,
        }
    }

    /// Probe the deployment behind `descriptor`; its database index is ignored.
    pub async fn probe(&self, descriptor: &TopologyDescriptor) -> Result<ProbeResult, ProbeError> {
        // Database 0 always exists, higher ones are optional
        let descriptor = descriptor.clone().with_db_index(0);
        log_target("checking for dbs", &descriptor);

        let handle = self
            .lifecycle
            .establish(self.connector.as_ref(), &descriptor)
            .await
            .map_err(|e| {
                warn!("Cannot connect to redis db: {}", e);
                ProbeError::Connect(e)
            })?;

        let handle = Arc::new(handle);
        let teardown = Teardown(Some(Arc::clone(&handle)));
        let result = self.run_diagnostics(&handle, &descriptor).await;
        teardown.finish().await;
        result
    }

    async fn run_diagnostics(
        &self,
        handle: &C::Handle,
        descriptor: &TopologyDescriptor,
    ) -> Result<ProbeResult, ProbeError> {
        let command_timeout = self.connector.command_timeout();
        let keyspace_slot = DiagnosticSlot::<()> {
            name: "INFO keyspace",
            policy: SlotPolicy::Fatal,
        };
        let ceiling_slot = DiagnosticSlot {
            name: "CONFIG GET databases",
            policy: SlotPolicy::TolerateWithDefault(self.default_ceiling),
        };

        let (keyspace_reply, ceiling_reply) = join(
            bounded(command_timeout, "INFO", handle.call(&["INFO", "keyspace"])),
            bounded(command_timeout, "CONFIG", handle.call(&["CONFIG", "GET", "databases"])),
        )
        .await;

        let keyspace_text = keyspace_reply.and_then(|reply| {
            reply
                .as_text()
                .ok_or_else(|| TransportError::protocol("INFO keyspace reply is not text"))
        });
        let used = match keyspace_text {
            Ok(text) => parse_keyspace(&text),
            Err(e) => {
                keyspace_slot.settle(Err(e)).map_err(ProbeError::Keyspace)?;
                Vec::new()
            }
        };

        let max = ceiling_slot.settle(ceiling_reply.and_then(|reply| {
            parse_database_ceiling(&reply)
                .ok_or_else(|| TransportError::protocol("unexpected CONFIG GET databases reply"))
        }));
        let max = max.unwrap_or(self.default_ceiling);

        Ok(ProbeResult {
            server: descriptor.server_display(),
            used,
            max,
        })
    }
}

/// Bound a command by the transport's command timeout; a timeout is a command failure
async fn bounded<F>(limit: Duration, name: &str, call: F) -> Result<RespValue, TransportError>
where
    F: Future<Output = Result<RespValue, TransportError>>,
{
    timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(TransportError::timeout(name)))
}

/// Parse `db<N>:keys=<K>,...` lines of an `INFO keyspace` reply; other lines are skipped
pub fn parse_keyspace(info: &str) -> Vec<DatabaseUsage> {
    info.lines()
        .filter_map(|line| {
            let (db, fields) = line.trim().strip_prefix("db")?.split_once(':')?;
            let db_index = db.parse::<u32>().ok()?;
            let keys = fields
                .split(',')
                .find_map(|field| field.strip_prefix("keys="))?
                .parse::<u64>()
                .ok()?;
            Some(DatabaseUsage { db_index, keys })
        })
        .collect()
}

/// `CONFIG GET databases` answers `["databases", "<n>"]`
pub fn parse_database_ceiling(reply: &RespValue) -> Option<u32> {
    match reply.as_array()? {
        [_, value, ..] => value.as_text()?.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn log_target(action: &str, descriptor: &TopologyDescriptor) {
    match &descriptor.topology {
        Topology::Sentinel {
            sentinels,
            sentinel_name,
            ..
        } => {
            let nodes: Vec<String> = sentinels.iter().map(ToString::to_string).collect();
            info!("{} at sentinel... {} [{}]", action, sentinel_name, nodes.join(", "));
        }
        Topology::Cluster { clusters } => {
            let nodes: Vec<String> = clusters.iter().map(ToString::to_string).collect();
            info!("{} at cluster... [{}]", action, nodes.join(", "));
        }
        Topology::Socket { path } => info!("{}... {}", action, path),
        Topology::Standalone { host, port } => info!("{}... {} {}", action, host, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tests::standalone;
    use crate::transport::fake::{FakeConnector, Reply, Script};

    fn probe_with(script: Script) -> (DatabaseProbe<FakeConnector>, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::new(script));
        let probe = DatabaseProbe::new(
            Arc::clone(&connector),
            ConnectionLifecycleCoordinator::new(Duration::from_millis(200)),
            DEFAULT_DATABASE_CEILING,
        );
        (probe, connector)
    }

    #[test]
    fn test_parse_keyspace() {
        let used = parse_keyspace("db0:keys=5,expires=0\r\ndb2:keys=10,expires=1\r\n");
        assert_eq!(
            used,
            vec![
                DatabaseUsage { db_index: 0, keys: 5 },
                DatabaseUsage { db_index: 2, keys: 10 }
            ]
        );
    }

    #[test]
    fn test_parse_keyspace_ignores_noise() {
        let info = "# Keyspace\r\n\r\ndbx:keys=1\r\ndb3:expires=1\r\n  db7:keys=42,expires=0,avg_ttl=0\r\n";
        assert_eq!(parse_keyspace(info), vec![DatabaseUsage { db_index: 7, keys: 42 }]);
        assert!(parse_keyspace("").is_empty());
    }

    #[test]
    fn test_parse_database_ceiling() {
        let reply = RespValue::Array(Some(vec![RespValue::bulk("databases"), RespValue::bulk("32")]));
        assert_eq!(parse_database_ceiling(&reply), Some(32));
        assert_eq!(parse_database_ceiling(&RespValue::Array(Some(vec![]))), None);
        assert_eq!(parse_database_ceiling(&RespValue::bulk("16")), None);
    }

    #[tokio::test]
    async fn test_probe_success_forces_db_zero() {
        let (probe, connector) = probe_with(Script {
            keyspace: Reply::Value(RespValue::bulk("# Keyspace\r\ndb0:keys=5,expires=0\r\ndb2:keys=10,expires=1\r\n")),
            databases: Reply::Value(RespValue::Array(Some(vec![
                RespValue::bulk("databases"),
                RespValue::bulk("64"),
            ]))),
            ..Default::default()
        });

        let result = probe.probe(&standalone("x", None, 5)).await.unwrap();
        assert_eq!(result.server, "standalone 127.0.0.1");
        assert_eq!(result.max, 64);
        assert_eq!(result.used.len(), 2);
        assert_eq!(*connector.counters.db_indexes.lock().unwrap(), vec![0]);
        assert_eq!(connector.counters.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_ceiling_failure_is_tolerated() {
        let (probe, connector) = probe_with(Script {
            databases: Reply::Error("NOPERM this user has no permissions to run the 'config|get' command".to_string()),
            ..Default::default()
        });

        let result = probe.probe(&standalone("x", None, 0)).await.unwrap();
        assert_eq!(result.max, DEFAULT_DATABASE_CEILING);
        assert_eq!(result.used, vec![DatabaseUsage { db_index: 0, keys: 1 }]);
        assert_eq!(connector.counters.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_ceiling_timeout_is_tolerated() {
        let (probe, connector) = probe_with(Script {
            databases: Reply::Hang,
            ..Default::default()
        });

        let result = probe.probe(&standalone("x", None, 0)).await.unwrap();
        assert_eq!(result.max, DEFAULT_DATABASE_CEILING);
        assert_eq!(connector.counters.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_keyspace_failure_fails_probe() {
        let (probe, connector) = probe_with(Script {
            keyspace: Reply::Error("NOPERM info".to_string()),
            ..Default::default()
        });

        let err = probe.probe(&standalone("x", None, 0)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Keyspace(TransportError::Server(_))));
        assert_eq!(err.to_string(), "NOPERM info");
        assert_eq!(connector.counters.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_keyspace_timeout_fails_probe() {
        let (probe, connector) = probe_with(Script {
            keyspace: Reply::Hang,
            ..Default::default()
        });

        let err = probe.probe(&standalone("x", None, 0)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Keyspace(TransportError::Timeout { .. })));
        assert_eq!(connector.counters.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_detection_still_disconnects() {
        let (probe, connector) = probe_with(Script {
            keyspace: Reply::Hang,
            ..Default::default()
        });

        let abandoned = timeout(Duration::from_millis(20), probe.probe(&standalone("x", None, 0))).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.counters.connects(), 1);
        assert_eq!(connector.counters.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_before_ready() {
        let (probe, connector) = probe_with(Script {
            events: vec![Err("connect ECONNREFUSED 127.0.0.1:6379".to_string())],
            ..Default::default()
        });

        let err = probe.probe(&standalone("x", None, 0)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Connect(_)));
        assert_eq!(connector.counters.disconnects(), 1);
        assert!(connector.counters.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_both_diagnostics_are_issued() {
        let (probe, connector) = probe_with(Script::default());
        probe.probe(&standalone("x", None, 0)).await.unwrap();

        let commands = connector.counters.commands.lock().unwrap().clone();
        assert!(commands.contains(&"INFO keyspace".to_string()));
        assert!(commands.contains(&"CONFIG GET databases".to_string()));
    }
}
