use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{KvError, KvStore};

struct Entry {
  value: String,
  expires_at: Option<Instant>,
}

/// An in-process `KvStore`, for unit tests and single-host
/// development. TTLs are checked lazily on read, not via a reaper
/// task — good enough since nothing in this crate depends on prompt
/// eviction, only on "expired keys read as absent".
#[derive(Default)]
pub struct InMemoryStore {
  entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    InMemoryStore::default()
  }

  fn live(entry: &Entry) -> bool {
    entry.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
  }
}

#[async_trait]
impl KvStore for InMemoryStore {
  async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
    let entries = self.entries.read().await;
    Ok(
      entries
        .get(key)
        .filter(|e| Self::live(e))
        .map(|e| e.value.clone()),
    )
  }

  async fn set(
    &self,
    key: &str,
    value: &str,
    ttl_secs: Option<u64>,
  ) -> Result<(), KvError> {
    let mut entries = self.entries.write().await;
    entries.insert(
      key.to_string(),
      Entry {
        value: value.to_string(),
        expires_at: ttl_secs.map(|s| Instant::now() + Duration::from_secs(s)),
      },
    );
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), KvError> {
    self.entries.write().await.remove(key);
    Ok(())
  }

  async fn compare_and_set(
    &self,
    key: &str,
    expected: Option<&str>,
    new_value: &str,
  ) -> Result<(), KvError> {
    let mut entries = self.entries.write().await;
    let current = entries
      .get(key)
      .filter(|e| Self::live(e))
      .map(|e| e.value.clone());

    if current.as_deref() != expected {
      return Err(KvError::CasConflict {
        key: key.to_string(),
        expected: expected.map(str::to_string),
        found: current,
      });
    }

    entries.insert(
      key.to_string(),
      Entry {
        value: new_value.to_string(),
        expires_at: None,
      },
    );
    Ok(())
  }

  async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, KvError> {
    let entries = self.entries.read().await;
    Ok(
      entries
        .iter()
        .filter(|(k, e)| k.starts_with(prefix) && Self::live(e))
        .map(|(k, e)| (k.clone(), e.value.clone()))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn get_missing_is_none() {
    let store = InMemoryStore::new();
    assert_eq!(store.get("foo").await.unwrap(), None);
  }

  #[tokio::test]
  async fn cas_succeeds_when_expectation_matches() {
    let store = InMemoryStore::new();
    store.compare_and_set("foo", None, "v1").await.unwrap();
    assert_eq!(store.get("foo").await.unwrap().as_deref(), Some("v1"));
    store
      .compare_and_set("foo", Some("v1"), "v2")
      .await
      .unwrap();
    assert_eq!(store.get("foo").await.unwrap().as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn cas_conflict_reports_actual_value() {
    let store = InMemoryStore::new();
    store.set("foo", "v1", None).await.unwrap();
    let err = store
      .compare_and_set("foo", Some("stale"), "v2")
      .await
      .unwrap_err();
    match err {
      KvError::CasConflict { found, .. } => assert_eq!(found.as_deref(), Some("v1")),
      _ => panic!("expected CasConflict"),
    }
  }

  #[tokio::test]
  async fn ttl_expires_key() {
    tokio::time::pause();
    let store = InMemoryStore::new();
    store.set("lease", "alive", Some(1)).await.unwrap();
    assert_eq!(store.get("lease").await.unwrap().as_deref(), Some("alive"));
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(store.get("lease").await.unwrap(), None);
  }

  #[tokio::test]
  async fn list_prefix_filters_by_key() {
    let store = InMemoryStore::new();
    store.set("components/web/state", "a", None).await.unwrap();
    store.set("components/db/state", "b", None).await.unwrap();
    store.set("machines/host1/state", "c", None).await.unwrap();
    let mut found = store.list_prefix("components/").await.unwrap();
    found.sort();
    assert_eq!(
      found,
      vec![
        ("components/db/state".to_string(), "b".to_string()),
        ("components/web/state".to_string(), "a".to_string()),
      ]
    );
  }
}
