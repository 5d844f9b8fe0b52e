use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use dockerengine::{Container, ContainerEngine};
use entities::{ComponentConfig, ContainerStatus, PortKind, ProjectConfig};
use metadata::MetadataStore;
use proxy::{Proxy, Route};
use tracing::warn;

use crate::component::Component;
use crate::termination::TerminationPool;

/// What a consuming component needs to inject a required link as
/// environment (§4.2 step 3).
#[derive(Debug, Clone)]
pub struct ResolvedLink {
  pub kind: PortKind,
  pub container_port: u16,
  pub host_address: String,
  pub host_port: u16,
  pub running: bool,
}

/// Process-wide owner of every `Component` on this host, the `Proxy`
/// facade, and the termination worker pool (§4.3).
pub struct RuntimeManager {
  components: HashMap<String, Component>,
  engine: Arc<dyn ContainerEngine>,
  metadata: Arc<MetadataStore>,
  proxy: Arc<dyn Proxy>,
  host_address: String,
  machine_id: String,
  termination: TerminationPool,
}

impl RuntimeManager {
  pub fn new(
    project: &ProjectConfig,
    engine: Arc<dyn ContainerEngine>,
    metadata: Arc<MetadataStore>,
    proxy: Arc<dyn Proxy>,
    host_address: String,
    machine_id: String,
  ) -> Self {
    let components = project
      .components
      .iter()
      .map(|config| {
        (
          config.name.clone(),
          Component::new(config.clone(), engine.clone(), metadata.clone()),
        )
      })
      .collect();

    RuntimeManager {
      components,
      engine,
      metadata,
      proxy,
      host_address,
      machine_id,
      termination: TerminationPool::new(8),
    }
  }

  pub fn machine_id(&self) -> &str {
    &self.machine_id
  }

  pub fn component(&self, name: &str) -> Option<&Component> {
    self.components.get(name)
  }

  pub fn component_names(&self) -> impl Iterator<Item = &str> {
    self.components.keys().map(String::as_str)
  }

  /// Resolves the first component that defines `link_name` (§4.3
  /// `lookupComponentLink`): allocates and persists a host port for it
  /// under the *defining* component if one isn't already assigned.
  pub async fn lookup_component_link(&self, link_name: &str) -> Option<ResolvedLink> {
    for component in self.components.values() {
      let Some(link) = component.config().find_defined_link(link_name) else {
        continue;
      };

      let field = format!("link-{link_name}-port");
      let host_port = match self.metadata.component_field(component.name(), &field).await {
        Some(value) => value.parse().ok()?,
        None => {
          let port = pick_unused_port();
          let _ = self
            .metadata
            .set_component_field(component.name(), &field, &port.to_string())
            .await;
          port
        }
      };

      let running = matches!(component.primary_container().await, Ok(Some(_)));

      return Some(ResolvedLink {
        kind: link.kind,
        container_port: link.port,
        host_address: self.host_address.clone(),
        host_port,
        running,
      });
    }
    None
  }

  pub async fn adjust_for_updating_component(&self, _component: &str) -> anyhow::Result<()> {
    self.rebuild_routes().await
  }

  pub async fn adjust_for_stopping_component(&self, _component: &str) -> anyhow::Result<()> {
    self.rebuild_routes().await
  }

  /// Route reconstruction (§4.5): one route per declared port mapping
  /// and one per defined component link, for every non-draining
  /// container across every component.
  async fn rebuild_routes(&self) -> anyhow::Result<()> {
    self.proxy.clear_routes().await;

    let mut routed = Vec::new();
    for component in self.components.values() {
      let Some(container) = component.primary_container().await? else {
        continue;
      };
      let Ok(inspect) = self.engine.inspect(&container.id).await else {
        warn!(component = component.name(), "could not inspect container for routing");
        continue;
      };
      let Ok(ip) = inspect.ip_address.parse() else {
        continue;
      };

      self.add_port_routes(component.config(), ip).await;
      self.add_link_routes(component, ip).await;
      routed.push(container.id);
    }

    self.proxy.commit().await?;

    for container_id in routed {
      if let Err(error) = self.metadata.set_container_status(&container_id, ContainerStatus::Running).await {
        warn!(%error, %container_id, "failed to record container as running");
      }
    }

    Ok(())
  }

  async fn add_port_routes(&self, config: &ComponentConfig, ip: std::net::IpAddr) {
    for port in &config.ports {
      self
        .proxy
        .add_route(Route {
          listen_port: port.external,
          backend: SocketAddr::new(ip, port.container),
        })
        .await;
    }
  }

  async fn add_link_routes(&self, component: &Component, ip: std::net::IpAddr) {
    for link in &component.config().defined_component_links {
      let field = format!("link-{}-port", link.name);
      let Some(host_port) = self.metadata.component_field(component.name(), &field).await else {
        continue;
      };
      let Ok(host_port) = host_port.parse() else {
        continue;
      };
      self
        .proxy
        .add_route(Route {
          listen_port: host_port,
          backend: SocketAddr::new(ip, link.port),
        })
        .await;
    }
  }

  /// Submits a drain task for `container` and returns immediately
  /// (§4.3 `terminateContainer`).
  pub async fn terminate_container(
    &self,
    container: Container,
    component_name: String,
    config: ComponentConfig,
  ) {
    self
      .termination
      .submit(
        container,
        component_name,
        config,
        self.engine.clone(),
        self.metadata.clone(),
        self.proxy.clone(),
      )
      .await;
  }

  /// Waits for every outstanding termination worker, propagating the
  /// first failure (§4.3 `join()`).
  pub async fn join(&self) -> anyhow::Result<()> {
    self.termination.join().await
  }

  pub async fn shutdown(&self) {
    self.proxy.shutdown().await;
  }
}

/// Binds an ephemeral local port and releases it immediately, for
/// allocating a stable host port to a new component link (§4.3).
fn pick_unused_port() -> u16 {
  std::net::TcpListener::bind("127.0.0.1:0")
    .and_then(|l| l.local_addr())
    .map(|addr| addr.port())
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use dockerengine::FakeEngine;
  use proxy::TcpProxy;
  use serde_json::json;

  async fn manager() -> RuntimeManager {
    let db_config: ComponentConfig = serde_json::from_value(json!({
      "name": "db",
      "repo": "acme/db",
      "definedComponentLinks": [{"name": "db-link", "port": 5432}],
    }))
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let metadata = Arc::new(
      MetadataStore::open(dir.path().join(".gantry_metadata"))
        .await
        .unwrap(),
    );
    let proxy = Arc::new(TcpProxy::new("127.0.0.1:0".parse().unwrap()));
    let engine = Arc::new(FakeEngine::new());
    let project = ProjectConfig {
      components: vec![db_config],
    };
    RuntimeManager::new(
      &project,
      engine,
      metadata,
      proxy,
      "127.0.0.1".to_string(),
      "host-1".to_string(),
    )
  }

  #[tokio::test]
  async fn lookup_component_link_allocates_and_persists_a_port() {
    let manager = manager().await;
    let first = manager.lookup_component_link("db-link").await.unwrap();
    assert!(!first.running);
    assert_eq!(first.container_port, 5432);

    let second = manager.lookup_component_link("db-link").await.unwrap();
    assert_eq!(first.host_port, second.host_port);
  }

  #[tokio::test]
  async fn lookup_component_link_returns_none_when_undeclared() {
    let manager = manager().await;
    assert!(manager.lookup_component_link("nope").await.is_none());
  }
}
