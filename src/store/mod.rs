//! Saved connection persistence
//!
//! The service never touches files directly. It loads the saved list,
//! edits it with the pure [`with_connection`] / [`without_connection`]
//! helpers and hands the whole list back to [`ConnectionStore::replace`].

use crate::core::TopologyDescriptor;
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Where saved descriptors live
#[async_trait]
pub trait ConnectionStore: Send + Sync + 'static {
    /// Every saved descriptor, in save order
    async fn load(&self) -> Result<Vec<TopologyDescriptor>, StoreError>;

    /// Overwrite the saved list
    async fn replace(&self, connections: Vec<TopologyDescriptor>) -> Result<(), StoreError>;
}

/// Append `descriptor` unless a connection with the same identity is already saved
pub fn with_connection(
    mut connections: Vec<TopologyDescriptor>,
    descriptor: &TopologyDescriptor,
) -> Vec<TopologyDescriptor> {
    if !connections.iter().any(|saved| saved.same_identity(descriptor)) {
        connections.push(descriptor.clone());
    }
    connections
}

/// Drop every saved descriptor addressed by `connection_id`
pub fn without_connection(
    mut connections: Vec<TopologyDescriptor>,
    connection_id: &str,
) -> Result<Vec<TopologyDescriptor>, StoreError> {
    let before = connections.len();
    connections.retain(|saved| saved.connection_id() != connection_id);
    if connections.len() == before {
        return Err(StoreError::NotFound {
            connection_id: connection_id.to_string(),
        });
    }
    Ok(connections)
}

/// On-disk layout: a list of `[[connections]]` tables
#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedConnections {
    #[serde(default)]
    connections: Vec<TopologyDescriptor>,
}

/// TOML file backed store
#[derive(Debug, Clone)]
pub struct FileConnectionStore {
    path: PathBuf,
}

impl FileConnectionStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl ConnectionStore for FileConnectionStore {
    async fn load(&self) -> Result<Vec<TopologyDescriptor>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No saved connections at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let saved: SavedConnections =
            toml::from_str(&content).map_err(|e| StoreError::Parse(e.to_string()))?;
        Ok(saved.connections)
    }

    async fn replace(&self, connections: Vec<TopologyDescriptor>) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(&SavedConnections { connections })
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }

        // Readers never see a half-written file
        let temp = self.temp_path();
        tokio::fs::write(&temp, content)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        debug!("Saved connections written to {}", self.path.display());
        Ok(())
    }
}

/// In-process store, used with `--ephemeral` and in tests
#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    connections: Mutex<Vec<TopologyDescriptor>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connections(connections: Vec<TopologyDescriptor>) -> Self {
        Self {
            connections: Mutex::new(connections),
        }
    }

    pub fn snapshot(&self) -> Vec<TopologyDescriptor> {
        self.connections
            .lock()
            .map(|connections| connections.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn load(&self) -> Result<Vec<TopologyDescriptor>, StoreError> {
        self.connections
            .lock()
            .map(|connections| connections.clone())
            .map_err(|_| StoreError::Io("connection store lock poisoned".to_string()))
    }

    async fn replace(&self, connections: Vec<TopologyDescriptor>) -> Result<(), StoreError> {
        let mut guard = self
            .connections
            .lock()
            .map_err(|_| StoreError::Io("connection store lock poisoned".to_string()))?;
        *guard = connections;
        Ok(())
    }
}
