use std::sync::Arc;

use dockerengine::{Container, ContainerEngine};
use entities::{ComponentConfig, ContainerStatus};
use healthkit::CheckContext;
use metadata::MetadataStore;
use proxy::Proxy;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// A bounded Tokio worker pool for container drain-terminations
/// (§4.3): `submit` enqueues and returns immediately; `join` awaits
/// every outstanding drain, surfacing the first failure.
pub struct TerminationPool {
  semaphore: Arc<Semaphore>,
  tasks: Mutex<JoinSet<anyhow::Result<()>>>,
}

impl TerminationPool {
  pub fn new(concurrency: usize) -> Self {
    TerminationPool {
      semaphore: Arc::new(Semaphore::new(concurrency)),
      tasks: Mutex::new(JoinSet::new()),
    }
  }

  pub async fn submit(
    &self,
    container: Container,
    component_name: String,
    config: ComponentConfig,
    engine: Arc<dyn ContainerEngine>,
    metadata: Arc<MetadataStore>,
    proxy: Arc<dyn Proxy>,
  ) {
    let semaphore = self.semaphore.clone();
    let handle = tokio::spawn(async move {
      let _permit = semaphore.acquire_owned().await.ok();
      watch_termination(container, component_name, config, engine, metadata, proxy).await
    });

    let mut tasks = self.tasks.lock().await;
    tasks.spawn(async move { handle.await.unwrap_or_else(|e| Err(anyhow::anyhow!(e))) });
  }

  pub async fn join(&self) -> anyhow::Result<()> {
    let mut tasks = self.tasks.lock().await;
    let mut first_error = None;
    while let Some(result) = tasks.join_next().await {
      let outcome = result.unwrap_or_else(|e| Err(anyhow::anyhow!(e)));
      if let Err(error) = outcome {
        warn!(%error, "termination worker failed");
        if first_error.is_none() {
          first_error = Some(error);
        }
      }
    }
    match first_error {
      Some(error) => Err(error),
      None => Ok(()),
    }
  }
}

/// Runs the drain-then-stop sequence for a single container (§4.3
/// step 2): fire termination signals best-effort, loop termination
/// checks until they all pass, then stop and forget it.
async fn watch_termination(
  container: Container,
  component_name: String,
  config: ComponentConfig,
  engine: Arc<dyn ContainerEngine>,
  metadata: Arc<MetadataStore>,
  proxy: Arc<dyn Proxy>,
) -> anyhow::Result<()> {
  let inspect = engine.inspect(&container.id).await?;
  let ctx = CheckContext {
    container_id: &container.id,
    container_ip: &inspect.ip_address,
  };

  for signal in &config.termination_signals {
    if let Err(error) = healthkit::run_termination_signal(signal, &ctx, engine.as_ref()).await {
      warn!(component = %component_name, container = %container.short_id(), %error, "termination signal failed");
    }
  }

  for check in &config.termination_checks {
    loop {
      match healthkit::run_check(check, &ctx, Some(proxy.as_ref())).await {
        Ok(true) => break,
        _ => tokio::time::sleep(check.timeout_duration()).await,
      }
    }
  }

  metadata
    .set_container_status(&container.id, ContainerStatus::ShuttingDown)
    .await?;
  engine.stop(&container.id).await?;
  metadata.forget_container(&container.id).await?;

  info!(component = %component_name, container = %container.short_id(), "container drained and stopped");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use dockerengine::FakeEngine;
  use proxy::TcpProxy;
  use serde_json::json;

  #[tokio::test]
  async fn watch_termination_stops_once_checks_pass() {
    let engine = Arc::new(FakeEngine::new());
    engine.pull("acme/web", "1").await.unwrap();
    let container = engine
      .create(dockerengine::CreateContainerSpec {
        image: "acme/web:1".to_string(),
        command: None,
        user: None,
        privileged: false,
        binds: vec![],
        exposed_ports: Default::default(),
        environment: Default::default(),
      })
      .await
      .unwrap();
    engine.start(&container.id).await.unwrap();
    engine
      .set_inspect(
        &container.id,
        dockerengine::ContainerInspect {
          ip_address: "10.0.0.9".to_string(),
          gateway: "10.0.0.1".to_string(),
        },
      )
      .await;

    let dir = tempfile::tempdir().unwrap();
    let metadata = Arc::new(
      MetadataStore::open(dir.path().join(".gantry_metadata"))
        .await
        .unwrap(),
    );
    let proxy: Arc<dyn Proxy> = Arc::new(TcpProxy::new("127.0.0.1:0".parse().unwrap()));

    let config: ComponentConfig = serde_json::from_value(json!({
      "name": "web",
      "repo": "acme/web",
    }))
    .unwrap();

    watch_termination(
      container.clone(),
      "web".to_string(),
      config,
      engine.clone(),
      metadata.clone(),
      proxy,
    )
    .await
    .unwrap();

    assert!(!engine.is_running(&container.id).await);
    assert_eq!(metadata.container_component(&container.id).await, None);
  }
}
