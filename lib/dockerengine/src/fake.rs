use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Container, ContainerEngine, ContainerInspect, CreateContainerSpec};

#[derive(Debug, Clone)]
struct FakeContainer {
  container: Container,
  running: bool,
  host_ports: HashMap<u16, u16>,
}

/// An in-memory `ContainerEngine` used to exercise the runtime state
/// machine in tests without a Docker daemon. Images are "pulled" into
/// a settable registry; `has_image`/`inspect_image` only see images
/// that were either seeded or pulled.
#[derive(Default)]
pub struct FakeEngine {
  next_id: AtomicU64,
  next_port: AtomicU64,
  containers: RwLock<Vec<FakeContainer>>,
  images: RwLock<HashMap<String, String>>,
  image_commands: RwLock<HashMap<String, Vec<String>>>,
  inspects: RwLock<HashMap<String, ContainerInspect>>,
  exec_log: RwLock<Vec<(String, String)>>,
}

impl FakeEngine {
  pub fn new() -> Self {
    FakeEngine {
      next_port: AtomicU64::new(30000),
      ..Default::default()
    }
  }

  /// Marks an image as already present, as if pulled in a prior run.
  pub async fn seed_image(&self, full_image: &str, image_id: &str) {
    self
      .images
      .write()
      .await
      .insert(full_image.to_string(), image_id.to_string());
  }

  /// Sets the default command an image reports when a component
  /// declares none of its own.
  pub async fn seed_image_command(&self, full_image: &str, command: Vec<String>) {
    self
      .image_commands
      .write()
      .await
      .insert(full_image.to_string(), command);
  }

  /// Sets the `ip_address`/`gateway` an `inspect()` call should return
  /// for a given container.
  pub async fn set_inspect(&self, container_id: &str, inspect: ContainerInspect) {
    self
      .inspects
      .write()
      .await
      .insert(container_id.to_string(), inspect);
  }

  pub async fn is_running(&self, container_id: &str) -> bool {
    self
      .containers
      .read()
      .await
      .iter()
      .find(|c| c.container.id == container_id)
      .map(|c| c.running)
      .unwrap_or(false)
  }

  pub async fn exec_log(&self) -> Vec<(String, String)> {
    self.exec_log.read().await.clone()
  }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
  async fn containers(&self) -> anyhow::Result<Vec<Container>> {
    Ok(
      self
        .containers
        .read()
        .await
        .iter()
        .map(|c| c.container.clone())
        .collect(),
    )
  }

  async fn inspect(&self, container_id: &str) -> anyhow::Result<ContainerInspect> {
    Ok(
      self
        .inspects
        .read()
        .await
        .get(container_id)
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn inspect_image(&self, full_image: &str) -> anyhow::Result<String> {
    self
      .images
      .read()
      .await
      .get(full_image)
      .cloned()
      .ok_or_else(|| anyhow::anyhow!("no such image: {full_image}"))
  }

  async fn has_image(&self, full_image: &str) -> anyhow::Result<bool> {
    Ok(self.images.read().await.contains_key(full_image))
  }

  async fn image_command(&self, full_image: &str) -> anyhow::Result<Option<Vec<String>>> {
    Ok(self.image_commands.read().await.get(full_image).cloned())
  }

  async fn pull(&self, repo: &str, tag: &str) -> anyhow::Result<()> {
    let full_image = format!("{repo}:{tag}");
    let digest = format!("sha256:fake-{repo}-{tag}");
    self.images.write().await.insert(full_image, digest);
    Ok(())
  }

  async fn create(&self, spec: CreateContainerSpec) -> anyhow::Result<Container> {
    if !self.images.read().await.contains_key(&spec.image) {
      bail!("no such image: {}", spec.image);
    }
    let n = self.next_id.fetch_add(1, Ordering::SeqCst);
    let id = format!("{n:012x}fake00000000000000000000000000000000000000000000");
    let id: String = id.chars().take(64).collect();
    let mut host_ports = HashMap::new();
    for port in &spec.exposed_ports {
      let host_port = self.next_port.fetch_add(1, Ordering::SeqCst) as u16;
      host_ports.insert(*port, host_port);
    }
    let container = Container {
      id: id.clone(),
      image: spec.image,
    };
    self.containers.write().await.push(FakeContainer {
      container: container.clone(),
      running: false,
      host_ports,
    });
    Ok(container)
  }

  async fn start(&self, container_id: &str) -> anyhow::Result<()> {
    let mut containers = self.containers.write().await;
    let c = containers
      .iter_mut()
      .find(|c| c.container.id == container_id)
      .ok_or_else(|| anyhow::anyhow!("no such container: {container_id}"))?;
    c.running = true;
    Ok(())
  }

  async fn stop(&self, container_id: &str) -> anyhow::Result<()> {
    let mut containers = self.containers.write().await;
    if let Some(c) = containers.iter_mut().find(|c| c.container.id == container_id) {
      c.running = false;
    }
    Ok(())
  }

  async fn kill(&self, container_id: &str) -> anyhow::Result<()> {
    self.stop(container_id).await
  }

  async fn port(
    &self,
    container_id: &str,
    container_port: u16,
  ) -> anyhow::Result<Option<u16>> {
    Ok(
      self
        .containers
        .read()
        .await
        .iter()
        .find(|c| c.container.id == container_id)
        .and_then(|c| c.host_ports.get(&container_port).copied()),
    )
  }

  async fn exec(&self, container_id: &str, command: &str) -> anyhow::Result<()> {
    self
      .exec_log
      .write()
      .await
      .push((container_id.to_string(), command.to_string()));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeSet;

  fn spec(image: &str) -> CreateContainerSpec {
    CreateContainerSpec {
      image: image.to_string(),
      command: None,
      user: None,
      privileged: false,
      binds: vec![],
      exposed_ports: BTreeSet::from([8080]),
      environment: HashMap::new(),
    }
  }

  #[tokio::test]
  async fn create_fails_without_pulled_image() {
    let engine = FakeEngine::new();
    assert!(engine.create(spec("web:1")).await.is_err());
  }

  #[tokio::test]
  async fn lifecycle_creates_starts_and_allocates_ports() {
    let engine = FakeEngine::new();
    engine.pull("web", "1").await.unwrap();
    let container = engine.create(spec("web:1")).await.unwrap();
    assert!(!engine.is_running(&container.id).await);

    engine.start(&container.id).await.unwrap();
    assert!(engine.is_running(&container.id).await);

    let port = engine.port(&container.id, 8080).await.unwrap();
    assert!(port.is_some());

    engine.stop(&container.id).await.unwrap();
    assert!(!engine.is_running(&container.id).await);
  }

  #[tokio::test]
  async fn exec_is_recorded() {
    let engine = FakeEngine::new();
    engine.pull("web", "1").await.unwrap();
    let container = engine.create(spec("web:1")).await.unwrap();
    engine.exec(&container.id, "nginx -s quit").await.unwrap();
    assert_eq!(
      engine.exec_log().await,
      vec![(container.id, "nginx -s quit".to_string())]
    );
  }
}
