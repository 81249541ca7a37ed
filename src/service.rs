//! Admin operations: login, database detection, logout and listing
//!
//! [`AdminService`] owns the live connection registry and wires the
//! descriptor builder, lifecycle coordinator, probe and persistence store
//! together. Operator mistakes and unreachable servers come back as
//! `{ok: false, message}` responses; only persistence failures are errors.

use crate::core::builder::{DescriptorBuilder, LoginRequest};
use crate::core::lifecycle::ConnectionLifecycleCoordinator;
use crate::core::probe::{log_target, DatabaseProbe, DatabaseUsage, DEFAULT_DATABASE_CEILING};
use crate::core::registry::ConnectionRegistry;
use crate::core::{ConnectionSummary, TopologyDescriptor};
use crate::error::PorteroResult;
use crate::store::{with_connection, without_connection, ConnectionStore};
use crate::transport::{ConnectionHandle, Connector};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Answer to `POST /login`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LoginResponse {
    pub fn success() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    pub fn already_connected() -> Self {
        Self {
            ok: true,
            message: Some("already logged in to this server and db".to_string()),
        }
    }

    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseSummary {
    pub used: Vec<DatabaseUsage>,
    pub max: u32,
}

/// Answer to `POST /login/detectDb`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProbeResponse {
    Found {
        ok: bool,
        server: String,
        dbs: DatabaseSummary,
    },
    Failed {
        ok: bool,
        message: String,
    },
}

impl ProbeResponse {
    fn failed<S: Into<String>>(message: S) -> Self {
        ProbeResponse::Failed {
            ok: false,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeResponse::Found { .. })
    }
}

/// What a logout actually removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutOutcome {
    pub live_removed: bool,
    pub saved_removed: bool,
}

/// Tunables taken from the process configuration
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub connect_timeout: Duration,
    pub default_database_ceiling: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            default_database_ceiling: DEFAULT_DATABASE_CEILING,
        }
    }
}

pub struct AdminService<C: Connector, S> {
    registry: Mutex<ConnectionRegistry<C::Handle>>,
    connector: Arc<C>,
    store: Arc<S>,
    /// Serializes load-modify-replace cycles on the store
    store_lock: Mutex<()>,
    lifecycle: ConnectionLifecycleCoordinator,
    probe: DatabaseProbe<C>,
}

impl<C: Connector, S: ConnectionStore> AdminService<C, S> {
    pub fn new(connector: Arc<C>, store: Arc<S>, options: ServiceOptions) -> Self {
        let lifecycle = ConnectionLifecycleCoordinator::new(options.connect_timeout);
        let probe = DatabaseProbe::new(
            Arc::clone(&connector),
            lifecycle.clone(),
            options.default_database_ceiling,
        );
        Self {
            registry: Mutex::new(ConnectionRegistry::new()),
            connector,
            store,
            store_lock: Mutex::new(()),
            lifecycle,
            probe,
        }
    }

    /// Connect and register a new connection, then remember it in the store.
    pub async fn login(&self, request: &LoginRequest) -> PorteroResult<LoginResponse> {
        let descriptor = match DescriptorBuilder::build(request) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!("Rejected login request: {}", e);
                return Ok(LoginResponse::failure(e.to_string()));
            }
        };

        if self.registry.lock().await.contains(&descriptor) {
            return Ok(LoginResponse::already_connected());
        }

        log_target("connecting", &descriptor);
        let handle = match self
            .lifecycle
            .establish(self.connector.as_ref(), &descriptor)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Invalid Login: {}", e);
                return Ok(LoginResponse::failure(format!("invalid login: {e}")));
            }
        };

        let duplicate = {
            let mut registry = self.registry.lock().await;
            if registry.contains(&descriptor) {
                Some(handle)
            } else {
                registry.insert(descriptor.clone(), handle);
                None
            }
        };
        if let Some(loser) = duplicate {
            debug!("Concurrent login for the same server and db, dropping the second handle");
            loser.disconnect().await;
            return Ok(LoginResponse::already_connected());
        }

        info!(
            connection_id = %descriptor.connection_id(),
            "Connected {} ({})",
            descriptor.label,
            descriptor.server_display()
        );

        self.remember(&descriptor).await?;
        Ok(LoginResponse::success())
    }

    /// Report which databases of a server hold keys, without registering anything.
    pub async fn detect_databases(&self, request: &LoginRequest) -> ProbeResponse {
        let descriptor = match DescriptorBuilder::build(request) {
            Ok(descriptor) => descriptor,
            Err(e) => return ProbeResponse::failed(e.to_string()),
        };

        match self.probe.probe(&descriptor).await {
            Ok(result) => ProbeResponse::Found {
                ok: true,
                server: result.server,
                dbs: DatabaseSummary {
                    used: result.used,
                    max: result.max,
                },
            },
            Err(e) => ProbeResponse::failed(e.to_string()),
        }
    }

    /// Disconnect and forget a connection. Missing entries are not an error.
    pub async fn logout(&self, connection_id: &str) -> PorteroResult<LogoutOutcome> {
        let removed = self.registry.lock().await.remove_by_identity(connection_id);
        let live_removed = match removed {
            Ok(entry) => {
                entry.handle.disconnect().await;
                info!(connection_id, "Disconnected {}", entry.descriptor.label);
                true
            }
            Err(e) => {
                info!("Logout: {}", e);
                false
            }
        };

        let _guard = self.store_lock.lock().await;
        let saved = self.store.load().await?;
        let saved_removed = match without_connection(saved, connection_id) {
            Ok(remaining) => {
                self.store.replace(remaining).await?;
                true
            }
            Err(e) => {
                info!("Logout: {}", e);
                false
            }
        };

        Ok(LogoutOutcome {
            live_removed,
            saved_removed,
        })
    }

    /// Live connections in registration order, without secrets
    pub async fn connections(&self) -> Vec<ConnectionSummary> {
        self.registry.lock().await.list_for_display()
    }

    /// Reconnect everything in the store. Failures are logged and skipped.
    pub async fn restore_saved_connections(&self) -> PorteroResult<usize> {
        let saved = self.store.load().await?;
        let mut restored = 0;

        for descriptor in saved {
            if self.registry.lock().await.contains(&descriptor) {
                continue;
            }
            log_target("connecting", &descriptor);
            match self
                .lifecycle
                .establish(self.connector.as_ref(), &descriptor)
                .await
            {
                Ok(handle) => {
                    let mut registry = self.registry.lock().await;
                    if registry.contains(&descriptor) {
                        drop(registry);
                        handle.disconnect().await;
                    } else {
                        registry.insert(descriptor, handle);
                        restored += 1;
                    }
                }
                Err(e) => warn!("Cannot restore saved connection {}: {}", descriptor.label, e),
            }
        }

        info!("Restored {} saved connection(s)", restored);
        Ok(restored)
    }

    /// Disconnect every live connection
    pub async fn shutdown(&self) {
        let entries = self.registry.lock().await.drain();
        for entry in entries {
            entry.handle.disconnect().await;
        }
    }

    async fn remember(&self, descriptor: &TopologyDescriptor) -> PorteroResult<()> {
        let _guard = self.store_lock.lock().await;
        let saved = self.store.load().await?;
        self.store.replace(with_connection(saved, descriptor)).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::builder::NumericField;
    use crate::core::tests::standalone;
    use crate::error::{PorteroError, StoreError};
    use crate::store::MemoryConnectionStore;
    use crate::transport::fake::{FakeConnector, Reply, Script};
    use crate::transport::resp::RespValue;
    use async_trait::async_trait;

    pub(crate) fn login_request(db_index: u32) -> LoginRequest {
        LoginRequest {
            label: Some("local".to_string()),
            hostname: Some("127.0.0.1".to_string()),
            port: Some(NumericField::Integer(6379)),
            password: Some("secret".to_string()),
            db_index: Some(NumericField::from(db_index)),
            ..Default::default()
        }
    }

    pub(crate) fn service_with(
        script: Script,
    ) -> (
        AdminService<FakeConnector, MemoryConnectionStore>,
        Arc<FakeConnector>,
        Arc<MemoryConnectionStore>,
    ) {
        let connector = Arc::new(FakeConnector::new(script));
        let store = Arc::new(MemoryConnectionStore::new());
        let service = AdminService::new(
            Arc::clone(&connector),
            Arc::clone(&store),
            ServiceOptions {
                connect_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        (service, connector, store)
    }

    /// Store whose writes always fail
    struct ReadOnlyStore;

    #[async_trait]
    impl ConnectionStore for ReadOnlyStore {
        async fn load(&self) -> Result<Vec<TopologyDescriptor>, StoreError> {
            Ok(vec![standalone("saved", None, 0)])
        }

        async fn replace(&self, _connections: Vec<TopologyDescriptor>) -> Result<(), StoreError> {
            Err(StoreError::Io("read-only file system".to_string()))
        }
    }

    #[tokio::test]
    async fn test_login_registers_and_saves() {
        let (service, _connector, store) = service_with(Script::default());

        let response = service.login(&login_request(0)).await.unwrap();
        assert_eq!(response, LoginResponse::success());

        let connections = service.connections().await;
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].label, "local");
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.snapshot()[0].password.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_duplicate_login_short_circuits() {
        let (service, connector, _store) = service_with(Script::default());
        service.login(&login_request(0)).await.unwrap();

        let mut again = login_request(0);
        again.password = Some("different".to_string());
        let response = service.login(&again).await.unwrap();

        assert_eq!(response, LoginResponse::already_connected());
        assert_eq!(connector.counters.connects(), 1);
        assert_eq!(service.connections().await.len(), 1);
    }

    #[tokio::test]
    async fn test_other_db_is_new_connection() {
        let (service, connector, store) = service_with(Script::default());
        service.login(&login_request(0)).await.unwrap();
        service.login(&login_request(1)).await.unwrap();

        assert_eq!(connector.counters.connects(), 2);
        assert_eq!(service.connections().await.len(), 2);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_logins_register_once() {
        let (service, connector, _store) = service_with(Script::default());
        let request = login_request(0);

        let (a, b) = tokio::join!(service.login(&request), service.login(&request));
        let responses = [a.unwrap(), b.unwrap()];

        assert!(responses.contains(&LoginResponse::success()));
        assert!(responses.contains(&LoginResponse::already_connected()));
        assert_eq!(service.connections().await.len(), 1);
        assert_eq!(
            connector.counters.connects() - connector.counters.disconnects(),
            1
        );
    }

    #[tokio::test]
    async fn test_login_failure_reports_once() {
        let (service, connector, store) = service_with(Script {
            events: vec![
                Err("WRONGPASS invalid username-password pair".to_string()),
                Err("ECONNRESET".to_string()),
            ],
            ..Default::default()
        });

        let response = service.login(&login_request(0)).await.unwrap();
        assert_eq!(
            response,
            LoginResponse::failure("invalid login: WRONGPASS invalid username-password pair")
        );
        assert!(service.connections().await.is_empty());
        assert!(store.snapshot().is_empty());
        assert_eq!(connector.counters.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_login_validation_failure() {
        let (service, connector, _store) = service_with(Script::default());
        let mut request = login_request(0);
        request.hostname = None;

        let response = service.login(&request).await.unwrap();
        assert_eq!(
            response,
            LoginResponse::failure("invalid or missing hostname or socket path")
        );
        assert_eq!(connector.counters.connects(), 0);
    }

    #[tokio::test]
    async fn test_login_save_failure_propagates() {
        let connector = Arc::new(FakeConnector::new(Script::default()));
        let service = AdminService::new(connector, Arc::new(ReadOnlyStore), ServiceOptions::default());

        let err = service.login(&login_request(0)).await.unwrap_err();
        assert!(matches!(err, PorteroError::Store(StoreError::Io(_))));
        // The live connection stays registered
        assert_eq!(service.connections().await.len(), 1);
    }

    #[tokio::test]
    async fn test_logout_removes_live_and_saved() {
        let (service, connector, store) = service_with(Script::default());
        service.login(&login_request(0)).await.unwrap();
        let id = service.connections().await[0].connection_id.clone();

        let outcome = service.logout(&id).await.unwrap();
        assert_eq!(
            outcome,
            LogoutOutcome {
                live_removed: true,
                saved_removed: true
            }
        );
        assert!(service.connections().await.is_empty());
        assert!(store.snapshot().is_empty());
        assert_eq!(connector.counters.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_logout_unknown_id_is_not_fatal() {
        let (service, _connector, _store) = service_with(Script::default());
        let outcome = service.logout("ffffffffffffffff").await.unwrap();
        assert!(!outcome.live_removed);
        assert!(!outcome.saved_removed);
    }

    #[tokio::test]
    async fn test_logout_saved_only() {
        let saved = standalone("saved", None, 3);
        let store = Arc::new(MemoryConnectionStore::with_connections(vec![saved.clone()]));
        let service = AdminService::new(
            Arc::new(FakeConnector::new(Script::default())),
            Arc::clone(&store),
            ServiceOptions::default(),
        );

        let outcome = service.logout(&saved.connection_id()).await.unwrap();
        assert!(!outcome.live_removed);
        assert!(outcome.saved_removed);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_logout_save_failure_propagates() {
        let service = AdminService::new(
            Arc::new(FakeConnector::new(Script::default())),
            Arc::new(ReadOnlyStore),
            ServiceOptions::default(),
        );
        let id = standalone("saved", None, 0).connection_id();
        assert!(matches!(
            service.logout(&id).await,
            Err(PorteroError::Store(StoreError::Io(_)))
        ));
    }

    #[tokio::test]
    async fn test_detect_databases() {
        let (service, connector, _store) = service_with(Script {
            keyspace: Reply::Value(RespValue::bulk("db0:keys=5,expires=0\r\ndb2:keys=10,expires=1\r\n")),
            ..Default::default()
        });

        let response = service.detect_databases(&login_request(4)).await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "ok": true,
                "server": "standalone 127.0.0.1",
                "dbs": {
                    "used": [{"dbIndex": 0, "keys": 5}, {"dbIndex": 2, "keys": 10}],
                    "max": 16
                }
            })
        );
        assert!(service.connections().await.is_empty());
        assert_eq!(connector.counters.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_detect_databases_connect_failure() {
        let (service, _connector, _store) = service_with(Script {
            events: vec![Err("connect ECONNREFUSED".to_string())],
            ..Default::default()
        });

        let response = service.detect_databases(&login_request(0)).await;
        assert!(!response.is_ok());
        assert_eq!(
            serde_json::to_value(&response).unwrap()["message"],
            "Error connecting to Redis to get all databases used: connect ECONNREFUSED"
        );
    }

    #[tokio::test]
    async fn test_restore_saved_connections() {
        let store = Arc::new(MemoryConnectionStore::with_connections(vec![
            standalone("a", None, 0),
            standalone("b", None, 1),
            standalone("a-again", None, 0),
        ]));
        let connector = Arc::new(FakeConnector::new(Script::default()));
        let service = AdminService::new(Arc::clone(&connector), store, ServiceOptions::default());

        assert_eq!(service.restore_saved_connections().await.unwrap(), 2);
        assert_eq!(service.connections().await.len(), 2);

        service.shutdown().await;
        assert!(service.connections().await.is_empty());
        assert_eq!(connector.counters.disconnects(), 2);
    }

    #[tokio::test]
    async fn test_restore_skips_failures() {
        let store = Arc::new(MemoryConnectionStore::with_connections(vec![standalone("a", None, 0)]));
        let connector = Arc::new(FakeConnector::new(Script {
            events: vec![Err("down".to_string())],
            ..Default::default()
        }));
        let service = AdminService::new(connector, Arc::clone(&store), ServiceOptions::default());

        assert_eq!(service.restore_saved_connections().await.unwrap(), 0);
        assert_eq!(store.snapshot().len(), 1);
    }
}
