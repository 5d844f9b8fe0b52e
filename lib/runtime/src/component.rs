use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use dockerengine::{Container, ContainerEngine, CreateContainerSpec};
use entities::{ComponentConfig, ContainerStatus};
use healthkit::CheckContext;
use metadata::MetadataStore;
use tracing::{info, warn};

use crate::manager::RuntimeManager;

/// The per-component state machine (§4.2): the only agent allowed to
/// call the container engine for containers belonging to `config.name`.
pub struct Component {
  name: String,
  config: ComponentConfig,
  engine: Arc<dyn ContainerEngine>,
  metadata: Arc<MetadataStore>,
}

impl Component {
  pub fn new(
    config: ComponentConfig,
    engine: Arc<dyn ContainerEngine>,
    metadata: Arc<MetadataStore>,
  ) -> Self {
    Component {
      name: config.name.clone(),
      config,
      engine,
      metadata,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn config(&self) -> &ComponentConfig {
    &self.config
  }

  /// Every container belonging to this component: image-matched or
  /// metadata-matched (Invariant 2, §3).
  pub async fn all_containers(&self) -> anyhow::Result<Vec<Container>> {
    let full_image = self.config.full_image();
    let mut owned = Vec::new();
    for container in self.engine.containers().await? {
      let owner = self.metadata.container_component(&container.id).await;
      if container.image == full_image || owner.as_deref() == Some(self.name.as_str()) {
        owned.push(container);
      }
    }
    Ok(owned)
  }

  pub async fn is_running(&self) -> anyhow::Result<bool> {
    Ok(!self.all_containers().await?.is_empty())
  }

  /// The unique non-`draining` container among `all_containers()`, if
  /// any (Invariant 1, §3).
  pub async fn primary_container(&self) -> anyhow::Result<Option<Container>> {
    for container in self.all_containers().await? {
      let status = self.metadata.container_status(&container.id).await;
      if status != ContainerStatus::Draining {
        return Ok(Some(container));
      }
    }
    Ok(None)
  }

  pub async fn image_id(&self) -> anyhow::Result<String> {
    self.engine.inspect_image(&self.config.full_image()).await
  }

  /// Best-effort pull; never propagates the underlying error upward
  /// (§9 Open Question resolution — an explicit bool, not exception
  /// control flow).
  pub async fn pull_repo(&self) -> bool {
    match self.engine.pull(&self.config.repo, &self.config.tag).await {
      Ok(()) => true,
      Err(error) => {
        warn!(component = %self.name, %error, "image pull failed");
        false
      }
    }
  }

  /// Runs every `healthCheck` against the primary container; `false`
  /// if there is no primary or any check fails.
  pub async fn healthy(&self) -> bool {
    let Ok(Some(container)) = self.primary_container().await else {
      return false;
    };
    let Ok(inspect) = self.engine.inspect(&container.id).await else {
      return false;
    };
    let ctx = CheckContext {
      container_id: &container.id,
      container_ip: &inspect.ip_address,
    };
    for check in &self.config.health_checks {
      match healthkit::run_check(check, &ctx, None).await {
        Ok(true) => continue,
        _ => return false,
      }
    }
    true
  }

  /// `(container, metadata status)` pairs for `gantry list` (§6.3).
  pub async fn container_information(&self) -> anyhow::Result<Vec<(Container, ContainerStatus)>> {
    let mut out = Vec::new();
    for container in self.all_containers().await? {
      let status = self.metadata.container_status(&container.id).await;
      out.push((container, status));
    }
    Ok(out)
  }

  /// Performs a zero-downtime rollover (§4.2 `update()`): start a new
  /// container, mark existing ones draining, ask the manager to
  /// reconfigure the proxy, then enqueue the old primary for
  /// termination.
  pub async fn update(&self, manager: &RuntimeManager) -> anyhow::Result<Container> {
    let existing = self.all_containers().await?;
    let old_primary = self.primary_container().await?;

    let new_container = self.start(manager).await?;

    for container in &existing {
      self
        .metadata
        .set_container_status(&container.id, ContainerStatus::Draining)
        .await?;
    }

    manager.adjust_for_updating_component(&self.name).await?;

    if let Some(old_primary) = old_primary {
      manager
        .terminate_container(old_primary, self.name.clone(), self.config.clone())
        .await;
    }

    Ok(new_container)
  }

  /// Stops the component (§4.2 `stop()`): no-op if not running,
  /// otherwise drains (and optionally kills) every container.
  pub async fn stop(&self, manager: &RuntimeManager, kill: bool) -> anyhow::Result<()> {
    if !self.is_running().await? {
      return Ok(());
    }

    let containers = self.all_containers().await?;
    for container in &containers {
      self
        .metadata
        .set_container_status(&container.id, ContainerStatus::Draining)
        .await?;
      if kill {
        self.engine.kill(&container.id).await?;
        self.metadata.forget_container(&container.id).await?;
      } else {
        manager
          .terminate_container(container.clone(), self.name.clone(), self.config.clone())
          .await;
      }
    }

    manager.adjust_for_stopping_component(&self.name).await?;
    Ok(())
  }

  async fn start(&self, manager: &RuntimeManager) -> anyhow::Result<Container> {
    let full_image = self.config.full_image();

    if !self.engine.has_image(&full_image).await? && !self.pull_repo().await {
      bail!("failed to pull image {full_image}");
    }

    let command = match self.config.command_string() {
      Some(command) => Some(command),
      None => self
        .engine
        .image_command(&full_image)
        .await?
        .map(|cmd| cmd.join(" ")),
    };
    if command.is_none() {
      bail!("no command resolvable for {full_image}");
    }

    let environment = self.build_environment(manager).await?;

    let spec = CreateContainerSpec {
      image: full_image.clone(),
      command,
      user: self.config.user.clone(),
      privileged: self.config.privileged,
      binds: self
        .config
        .bindings
        .iter()
        .map(|b| (b.host_path.clone(), b.container_path.clone()))
        .collect(),
      exposed_ports: self.config.container_ports(),
      environment,
    };

    let container = self.engine.create(spec).await?;
    self.engine.start(&container.id).await?;

    self
      .metadata
      .set_container_component(&container.id, &self.name)
      .await?;
    self
      .metadata
      .set_container_status(&container.id, ContainerStatus::Starting)
      .await?;

    if !self.wait_ready(&container).await {
      warn!(component = %self.name, container = %container.short_id(), "ready check timed out, stopping");
      let _ = self.engine.stop(&container.id).await;
      bail!("ready checks did not pass within the configured timeout");
    }

    info!(component = %self.name, container = %container.short_id(), "component started");
    Ok(container)
  }

  async fn build_environment(
    &self,
    manager: &RuntimeManager,
  ) -> anyhow::Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    for link in &self.config.required_component_links {
      let resolved = manager
        .lookup_component_link(&link.name)
        .await
        .with_context(|| format!("required link `{}` is not defined by any component", link.name))?;
      if !resolved.running {
        bail!("required link `{}` is not currently running", link.name);
      }

      let alias = link.alias.to_uppercase();
      let scheme = resolved.kind.scheme();
      let suffix = resolved.kind.env_suffix();
      let url = format!("{scheme}://{}:{}", resolved.host_address, resolved.host_port);

      env.insert(format!("{alias}_CLINK"), url.clone());
      let port_prefix = format!("{alias}_CLINK_{}_{suffix}", resolved.container_port);
      env.insert(port_prefix.clone(), url);
      env.insert(format!("{port_prefix}_PROTO"), scheme.to_string());
      env.insert(format!("{port_prefix}_ADDR"), resolved.host_address.clone());
      env.insert(format!("{port_prefix}_PORT"), resolved.host_port.to_string());
    }
    Ok(env)
  }

  async fn wait_ready(&self, container: &Container) -> bool {
    let deadline = tokio::time::Instant::now() + self.config.ready_timeout();
    loop {
      let Ok(inspect) = self.engine.inspect(&container.id).await else {
        return false;
      };
      let ctx = CheckContext {
        container_id: &container.id,
        container_ip: &inspect.ip_address,
      };

      let mut all_passed = true;
      for check in &self.config.ready_checks {
        match healthkit::run_check(check, &ctx, None).await {
          Ok(true) => continue,
          _ => {
            all_passed = false;
            if tokio::time::Instant::now() >= deadline {
              return false;
            }
            tokio::time::sleep(check.timeout_duration()).await;
            break;
          }
        }
      }
      if all_passed {
        return true;
      }
      if tokio::time::Instant::now() >= deadline {
        return false;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manager::RuntimeManager;
  use dockerengine::FakeEngine;
  use entities::ProjectConfig;
  use proxy::TcpProxy;
  use serde_json::json;

  fn web_config() -> ComponentConfig {
    serde_json::from_value(json!({
      "name": "web",
      "repo": "acme/web",
      "tag": "1",
      "ports": [{"external": 8000, "container": 80}],
    }))
    .unwrap()
  }

  async fn manager_with(configs: Vec<ComponentConfig>, engine: Arc<FakeEngine>) -> RuntimeManager {
    let dir = tempfile::tempdir().unwrap();
    let metadata = Arc::new(
      MetadataStore::open(dir.path().join(".gantry_metadata"))
        .await
        .unwrap(),
    );
    let proxy = Arc::new(TcpProxy::new("127.0.0.1:0".parse().unwrap()));
    let project = ProjectConfig { components: configs };
    RuntimeManager::new(&project, engine, metadata, proxy, "127.0.0.1".to_string(), "host-1".to_string())
  }

  #[tokio::test]
  async fn start_fails_fatally_when_image_cannot_be_pulled() {
    let engine = Arc::new(FakeEngine::new());
    let manager = manager_with(vec![web_config()], engine).await;
    let component = manager.component("web").unwrap();
    let err = component.start(&manager).await.unwrap_err();
    assert!(err.to_string().contains("failed to pull"));
  }

  #[tokio::test]
  async fn update_creates_container_and_marks_it_running() {
    let engine = Arc::new(FakeEngine::new());
    engine.pull("acme/web", "1").await.unwrap();
    engine
      .seed_image_command("acme/web:1", vec!["nginx".to_string()])
      .await;
    let manager = manager_with(vec![web_config()], engine.clone()).await;
    let component = manager.component("web").unwrap();

    let container = component.update(&manager).await.unwrap();
    assert!(engine.is_running(&container.id).await);
    assert!(component.is_running().await.unwrap());
    assert_eq!(component.image_id().await.unwrap(), "sha256:fake-acme/web-1");
  }

  #[tokio::test]
  async fn required_link_must_be_running() {
    let engine = Arc::new(FakeEngine::new());
    engine.pull("acme/api", "1").await.unwrap();
    engine
      .seed_image_command("acme/api:1", vec!["api".to_string()])
      .await;

    let mut api_config: ComponentConfig = serde_json::from_value(json!({
      "name": "api",
      "repo": "acme/api",
      "tag": "1",
      "requiredComponentLinks": [{"name": "db", "alias": "DB"}],
    }))
    .unwrap();
    api_config.command = vec!["api".to_string()];

    let manager = manager_with(vec![api_config], engine).await;
    let component = manager.component("api").unwrap();
    let err = component.update(&manager).await.unwrap_err();
    assert!(err.to_string().contains("db"));
  }
}
