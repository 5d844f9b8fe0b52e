//! The `ContainerEngine` trait (§6.1) and its implementations: a
//! `bollard`-backed engine for production use, and an in-memory fake
//! for exercising the `runtime` crate's state machine without a real
//! Docker daemon.

mod bollard_engine;
mod fake;

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

pub use bollard_engine::BollardEngine;
pub use fake::FakeEngine;

/// A running or stopped container, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
  /// The full 64-hex-character docker id.
  pub id: String,
  /// The image tag the container was created from (`repo:tag`).
  pub image: String,
}

impl Container {
  /// First 12 hex characters — the metadata store key (§3).
  pub fn short_id(&self) -> String {
    self.id.chars().take(12).collect()
  }
}

/// The subset of `docker inspect` this core depends on (§6.1).
#[derive(Debug, Clone, Default)]
pub struct ContainerInspect {
  pub ip_address: String,
  /// The host's IP address as seen from inside the container's
  /// network namespace — used to resolve component-link addresses.
  pub gateway: String,
}

/// Everything needed to create a new container for a component.
#[derive(Debug, Clone)]
pub struct CreateContainerSpec {
  pub image: String,
  pub command: Option<String>,
  pub user: Option<String>,
  pub privileged: bool,
  /// `(host_path, container_path)` pairs.
  pub binds: Vec<(String, String)>,
  pub exposed_ports: BTreeSet<u16>,
  pub environment: HashMap<String, String>,
}

/// The opaque external container engine collaborator (§6.1). All
/// errors are `anyhow` since the core only ever needs to know
/// "succeeded or not", logging the underlying cause.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
  /// All containers currently known to the engine (running and
  /// stopped), most-recently-created last.
  async fn containers(&self) -> anyhow::Result<Vec<Container>>;

  async fn inspect(&self, container_id: &str) -> anyhow::Result<ContainerInspect>;

  /// The canonical (non-human) image id for a named image
  /// (`repo:tag`), e.g. `sha256:...`.
  async fn inspect_image(&self, full_image: &str) -> anyhow::Result<String>;

  /// True if the named image is already present locally.
  async fn has_image(&self, full_image: &str) -> anyhow::Result<bool>;

  /// The image's baked-in default command (`Config.Cmd`), used when a
  /// component declares no explicit `command` (§4.2 step 2).
  async fn image_command(&self, full_image: &str) -> anyhow::Result<Option<Vec<String>>>;

  async fn pull(&self, repo: &str, tag: &str) -> anyhow::Result<()>;

  async fn create(&self, spec: CreateContainerSpec) -> anyhow::Result<Container>;

  async fn start(&self, container_id: &str) -> anyhow::Result<()>;

  async fn stop(&self, container_id: &str) -> anyhow::Result<()>;

  async fn kill(&self, container_id: &str) -> anyhow::Result<()>;

  /// The host-visible port bound to `container_port`, if the
  /// container publishes one.
  async fn port(
    &self,
    container_id: &str,
    container_port: u16,
  ) -> anyhow::Result<Option<u16>>;

  async fn exec(&self, container_id: &str, command: &str) -> anyhow::Result<()>;
}
