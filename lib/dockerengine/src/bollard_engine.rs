use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
  Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
  ListContainersOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use futures_util::StreamExt;
use tracing::trace;

use crate::{Container, ContainerEngine, ContainerInspect, CreateContainerSpec};

/// A `ContainerEngine` backed by the local Docker daemon over its Unix
/// socket, via `bollard`.
pub struct BollardEngine {
  docker: Docker,
}

impl BollardEngine {
  /// Connects using the daemon's default local socket
  /// (`DOCKER_HOST`, falling back to `/var/run/docker.sock`).
  pub fn connect() -> anyhow::Result<Self> {
    let docker = Docker::connect_with_local_defaults()?;
    Ok(BollardEngine { docker })
  }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
  async fn containers(&self) -> anyhow::Result<Vec<Container>> {
    let summaries = self
      .docker
      .list_containers(Some(ListContainersOptions::<String> {
        all: true,
        ..Default::default()
      }))
      .await?;
    Ok(
      summaries
        .into_iter()
        .filter_map(|s| {
          Some(Container {
            id: s.id?,
            image: s.image.unwrap_or_default(),
          })
        })
        .collect(),
    )
  }

  async fn inspect(&self, container_id: &str) -> anyhow::Result<ContainerInspect> {
    let resp = self
      .docker
      .inspect_container(container_id, None::<InspectContainerOptions>)
      .await?;
    let settings = resp.network_settings.unwrap_or_default();
    Ok(ContainerInspect {
      ip_address: settings.ip_address.unwrap_or_default(),
      gateway: settings.gateway.unwrap_or_default(),
    })
  }

  async fn inspect_image(&self, full_image: &str) -> anyhow::Result<String> {
    let resp = self.docker.inspect_image(full_image).await?;
    Ok(resp.id.unwrap_or_default())
  }

  async fn has_image(&self, full_image: &str) -> anyhow::Result<bool> {
    Ok(self.docker.inspect_image(full_image).await.is_ok())
  }

  async fn image_command(&self, full_image: &str) -> anyhow::Result<Option<Vec<String>>> {
    let resp = self.docker.inspect_image(full_image).await?;
    Ok(resp.config.and_then(|c| c.cmd))
  }

  async fn pull(&self, repo: &str, tag: &str) -> anyhow::Result<()> {
    let options = CreateImageOptions {
      from_image: repo.to_string(),
      tag: tag.to_string(),
      ..Default::default()
    };
    let mut stream = self.docker.create_image(Some(options), None, None);
    while let Some(progress) = stream.next().await {
      let info = progress?;
      if let Some(status) = info.status {
        trace!(%status, "pull progress");
      }
    }
    Ok(())
  }

  async fn create(&self, spec: CreateContainerSpec) -> anyhow::Result<Container> {
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    for port in &spec.exposed_ports {
      let key = format!("{port}/tcp");
      exposed_ports.insert(key.clone(), HashMap::new());
      port_bindings.insert(
        key,
        Some(vec![PortBinding {
          host_ip: Some("0.0.0.0".to_string()),
          host_port: None,
        }]),
      );
    }

    let binds: Vec<String> = spec
      .binds
      .iter()
      .map(|(host, container)| format!("{host}:{container}"))
      .collect();

    let env: Vec<String> = spec
      .environment
      .iter()
      .map(|(k, v)| format!("{k}={v}"))
      .collect();

    let host_config = HostConfig {
      binds: if binds.is_empty() { None } else { Some(binds) },
      port_bindings: Some(port_bindings),
      privileged: Some(spec.privileged),
      publish_all_ports: Some(true),
      ..Default::default()
    };

    let config = Config {
      image: Some(spec.image.clone()),
      cmd: spec
        .command
        .as_ref()
        .map(|c| c.split_whitespace().map(str::to_string).collect()),
      user: spec.user.clone(),
      env: if env.is_empty() { None } else { Some(env) },
      exposed_ports: Some(exposed_ports),
      host_config: Some(host_config),
      ..Default::default()
    };

    let response = self
      .docker
      .create_container(None::<CreateContainerOptions<String>>, config)
      .await?;

    Ok(Container {
      id: response.id,
      image: spec.image,
    })
  }

  async fn start(&self, container_id: &str) -> anyhow::Result<()> {
    self
      .docker
      .start_container(container_id, None::<StartContainerOptions<String>>)
      .await?;
    Ok(())
  }

  async fn stop(&self, container_id: &str) -> anyhow::Result<()> {
    self
      .docker
      .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
      .await?;
    Ok(())
  }

  async fn kill(&self, container_id: &str) -> anyhow::Result<()> {
    self
      .docker
      .kill_container(container_id, None::<KillContainerOptions<String>>)
      .await?;
    Ok(())
  }

  async fn port(
    &self,
    container_id: &str,
    container_port: u16,
  ) -> anyhow::Result<Option<u16>> {
    let resp = self
      .docker
      .inspect_container(container_id, None::<InspectContainerOptions>)
      .await?;
    let key = format!("{container_port}/tcp");
    let host_port = resp
      .network_settings
      .and_then(|s| s.ports)
      .and_then(|ports| ports.get(&key).cloned().flatten())
      .and_then(|bindings| bindings.into_iter().next())
      .and_then(|binding| binding.host_port)
      .and_then(|p| p.parse().ok());
    Ok(host_port)
  }

  async fn exec(&self, container_id: &str, command: &str) -> anyhow::Result<()> {
    let exec = self
      .docker
      .create_exec(
        container_id,
        CreateExecOptions {
          cmd: Some(vec!["/bin/sh".to_string(), "-c".to_string(), command.to_string()]),
          attach_stdout: Some(true),
          attach_stderr: Some(true),
          ..Default::default()
        },
      )
      .await?
      .id;

    if let StartExecResults::Attached { mut output, .. } =
      self.docker.start_exec(&exec, None).await?
    {
      while output.next().await.is_some() {}
    }
    Ok(())
  }
}
