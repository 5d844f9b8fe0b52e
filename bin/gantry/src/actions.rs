use colored::Colorize;
use entities::ContainerStatus;
use runtime::{Component, RuntimeManager};

/// Runs one of `gantry`'s actions against a single component (§4.2).
/// Returns whether the caller should enter the monitor loop afterwards
/// (only ever true for `start`/`update`, and only on success).
pub async fn run(
  action: &str,
  component: &Component,
  manager: &RuntimeManager,
) -> anyhow::Result<bool> {
  match action {
    "start" => start(component, manager).await,
    "update" => update(component, manager).await,
    "stop" => stop(component, manager).await,
    "kill" => kill(component, manager).await,
    "list" => list(component).await,
    other => anyhow::bail!("unknown action `{other}`"),
  }
}

async fn start(component: &Component, manager: &RuntimeManager) -> anyhow::Result<bool> {
  if component.is_running().await? {
    println!("Component {} is already running", component.name());
    return Ok(false);
  }
  component.update(manager).await?;
  Ok(true)
}

async fn update(component: &Component, manager: &RuntimeManager) -> anyhow::Result<bool> {
  component.update(manager).await?;
  Ok(true)
}

async fn stop(component: &Component, manager: &RuntimeManager) -> anyhow::Result<bool> {
  if !component.is_running().await? {
    println!("Component {} is not running", component.name());
    return Ok(false);
  }
  component.stop(manager, false).await?;
  Ok(false)
}

async fn kill(component: &Component, manager: &RuntimeManager) -> anyhow::Result<bool> {
  if !component.is_running().await? {
    println!("Component {} is not running", component.name());
    return Ok(false);
  }
  component.stop(manager, true).await?;
  Ok(false)
}

async fn list(component: &Component) -> anyhow::Result<bool> {
  if !component.is_running().await? {
    println!("Component {} is not running", component.name());
    return Ok(false);
  }

  println!("{:<20} {:<20} STATUS", "CONTAINER ID", "IMAGE");
  for (container, status) in component.container_information().await? {
    println!(
      "{:<20} {:<20} {}",
      container.short_id(),
      container.image,
      colorize_status(status)
    );
  }
  Ok(false)
}

fn colorize_status(status: ContainerStatus) -> colored::ColoredString {
  match status {
    ContainerStatus::Running => status.to_string().green(),
    ContainerStatus::Starting => status.to_string().yellow(),
    ContainerStatus::Draining | ContainerStatus::ShuttingDown => status.to_string().yellow(),
    ContainerStatus::Unknown => status.to_string().red(),
  }
}
