//! The process-local `.gantry_metadata` store (§4.1, §6.5): a
//! persistent map from container short-id to `{status, component}`
//! and from component name to arbitrary string fields (currently only
//! `link-<name>-port`).
//!
//! Crash-safety is desirable but not required (§4.1): a write that
//! never reaches disk degrades a container back to `unknown` status,
//! which the watcher recomputes on its next pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use entities::ContainerStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ContainerRecord {
  #[serde(skip_serializing_if = "Option::is_none")]
  status: Option<ContainerStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  component: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Db {
  #[serde(default)]
  containers: HashMap<String, ContainerRecord>,
  #[serde(default)]
  components: HashMap<String, HashMap<String, String>>,
}

/// The short (12-hex-character) id used as the metadata store's
/// container key.
pub fn short_id(docker_id: &str) -> String {
  docker_id.chars().take(12).collect()
}

pub struct MetadataStore {
  path: PathBuf,
  db: RwLock<Db>,
}

impl MetadataStore {
  /// Opens (or creates) the metadata file at `path`.
  pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
    let path = path.into();
    let db = match tokio::fs::read(&path).await {
      Ok(bytes) => serde_json::from_slice(&bytes)
        .with_context(|| format!("corrupt metadata file at {path:?}"))
        .unwrap_or_default(),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Db::default(),
      Err(e) => {
        return Err(e).with_context(|| {
          format!("failed to read metadata file at {path:?}")
        });
      }
    };
    Ok(MetadataStore {
      path,
      db: RwLock::new(db),
    })
  }

  async fn persist(&self, db: &Db) -> anyhow::Result<()> {
    let serialized = serde_json::to_vec_pretty(db)
      .context("failed to serialize metadata store")?;
    let tmp_path = tmp_path_for(&self.path);
    tokio::fs::write(&tmp_path, &serialized)
      .await
      .with_context(|| format!("failed to write {tmp_path:?}"))?;
    tokio::fs::rename(&tmp_path, &self.path)
      .await
      .with_context(|| {
        format!("failed to rename {tmp_path:?} to {:?}", self.path)
      })?;
    Ok(())
  }

  // ---- container fields ----

  pub async fn container_status(&self, container_id: &str) -> ContainerStatus {
    let key = short_id(container_id);
    let db = self.db.read().await;
    db.containers
      .get(&key)
      .and_then(|r| r.status)
      .unwrap_or_default()
  }

  pub async fn set_container_status(
    &self,
    container_id: &str,
    status: ContainerStatus,
  ) -> anyhow::Result<()> {
    let key = short_id(container_id);
    let mut db = self.db.write().await;
    db.containers.entry(key).or_default().status = Some(status);
    self.persist(&db).await
  }

  pub async fn container_component(
    &self,
    container_id: &str,
  ) -> Option<String> {
    let key = short_id(container_id);
    let db = self.db.read().await;
    db.containers.get(&key).and_then(|r| r.component.clone())
  }

  /// Sets the owning component for a container. Sticky: once a
  /// container has been assigned a component, later calls are no-ops
  /// (Invariant 2, §3).
  pub async fn set_container_component(
    &self,
    container_id: &str,
    component: &str,
  ) -> anyhow::Result<()> {
    let key = short_id(container_id);
    let mut db = self.db.write().await;
    let record = db.containers.entry(key).or_default();
    if record.component.is_none() {
      record.component = Some(component.to_string());
      self.persist(&db).await?;
    }
    Ok(())
  }

  /// Removes all metadata for a container (called after it has been
  /// stopped — §4.3 step 3).
  pub async fn forget_container(&self, container_id: &str) -> anyhow::Result<()> {
    let key = short_id(container_id);
    let mut db = self.db.write().await;
    if db.containers.remove(&key).is_some() {
      self.persist(&db).await?;
    }
    Ok(())
  }

  // ---- component fields ----

  pub async fn component_field(
    &self,
    component: &str,
    field: &str,
  ) -> Option<String> {
    let db = self.db.read().await;
    db.components
      .get(component)
      .and_then(|fields| fields.get(field))
      .cloned()
  }

  pub async fn set_component_field(
    &self,
    component: &str,
    field: &str,
    value: &str,
  ) -> anyhow::Result<()> {
    let mut db = self.db.write().await;
    db.components
      .entry(component.to_string())
      .or_default()
      .insert(field.to_string(), value.to_string());
    self.persist(&db).await
  }
}

fn tmp_path_for(path: &Path) -> PathBuf {
  let mut os = path.as_os_str().to_owned();
  os.push(".tmp");
  PathBuf::from(os)
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn store() -> (MetadataStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".gantry_metadata");
    (MetadataStore::open(&path).await.unwrap(), dir)
  }

  #[tokio::test]
  async fn unknown_container_status_defaults_to_unknown() {
    let (store, _dir) = store().await;
    assert_eq!(
      store.container_status("abc123abc123").await,
      ContainerStatus::Unknown
    );
  }

  #[tokio::test]
  async fn status_round_trips_and_persists() {
    let (store, dir) = store().await;
    store
      .set_container_status("abc123abc123def", ContainerStatus::Running)
      .await
      .unwrap();
    assert_eq!(
      store.container_status("abc123abc123def").await,
      ContainerStatus::Running
    );

    // Reopen from disk to verify persistence.
    let path = dir.path().join(".gantry_metadata");
    let reopened = MetadataStore::open(&path).await.unwrap();
    assert_eq!(
      reopened.container_status("abc123abc123def").await,
      ContainerStatus::Running
    );
  }

  #[tokio::test]
  async fn component_assignment_is_sticky() {
    let (store, _dir) = store().await;
    store
      .set_container_component("abc123abc123", "web")
      .await
      .unwrap();
    store
      .set_container_component("abc123abc123", "other")
      .await
      .unwrap();
    assert_eq!(
      store.container_component("abc123abc123").await.as_deref(),
      Some("web")
    );
  }

  #[tokio::test]
  async fn forget_removes_all_fields() {
    let (store, _dir) = store().await;
    store
      .set_container_component("abc123abc123", "web")
      .await
      .unwrap();
    store
      .set_container_status("abc123abc123", ContainerStatus::ShuttingDown)
      .await
      .unwrap();
    store.forget_container("abc123abc123").await.unwrap();
    assert_eq!(store.container_component("abc123abc123").await, None);
    assert_eq!(
      store.container_status("abc123abc123").await,
      ContainerStatus::Unknown
    );
  }

  #[tokio::test]
  async fn component_link_port_allocation_persists() {
    let (store, _dir) = store().await;
    assert_eq!(store.component_field("api", "link-db-port").await, None);
    store
      .set_component_field("api", "link-db-port", "54321")
      .await
      .unwrap();
    assert_eq!(
      store.component_field("api", "link-db-port").await.as_deref(),
      Some("54321")
    );
  }
}
