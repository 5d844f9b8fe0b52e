//! The distributed key-value store abstraction (§5): atomic
//! compare-and-set over string values, with optional TTL-backed keys
//! for liveness records (§5.2). Backed by etcd's v3 JSON gateway in
//! production, with an in-memory fake for tests.

mod etcd;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use etcd::EtcdStore;
pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum KvError {
  #[error("key not found: {0}")]
  NotFound(String),
  #[error("compare-and-set conflict on {key}: expected {expected:?}, found {found:?}")]
  CasConflict {
    key: String,
    expected: Option<String>,
    found: Option<String>,
  },
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

/// The distributed coordination primitive every host in a cluster
/// reads and writes through (§5). Implementations must make
/// `compare_and_set` atomic across all callers, wherever they run.
#[async_trait]
pub trait KvStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

  /// Sets `key` unconditionally. `ttl_secs`, when given, expires the
  /// key automatically — used for liveness records (§5.2) so a dead
  /// host's state disappears without an explicit cleanup pass.
  async fn set(
    &self,
    key: &str,
    value: &str,
    ttl_secs: Option<u64>,
  ) -> Result<(), KvError>;

  async fn delete(&self, key: &str) -> Result<(), KvError>;

  /// Atomically sets `key` to `new_value` only if its current value
  /// equals `expected` (`None` meaning "key must not exist"). Returns
  /// `Err(KvError::CasConflict)` on mismatch, carrying the value that
  /// was actually found so the caller can retry informed (§5.1).
  async fn compare_and_set(
    &self,
    key: &str,
    expected: Option<&str>,
    new_value: &str,
  ) -> Result<(), KvError>;

  /// All keys currently stored under `prefix`, with their values.
  async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, KvError>;
}
