#[macro_use]
extern crate tracing;

mod actions;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dockerengine::BollardEngine;
use logger::LogConfig;
use metadata::MetadataStore;
use proxy::TcpProxy;
use runtime::{Component, RuntimeManager};

const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// gantry: start, update, stop or kill a single component on this host.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
  /// The configuration file describing the project.
  config_file: PathBuf,

  /// The action to perform.
  action: Action,

  /// The name of the component to manage.
  component_name: String,

  /// If the action is `start` or `update`, keep running afterwards to
  /// monitor the component, restarting it if it becomes unhealthy.
  #[arg(short = 'm', long = "monitor")]
  monitor: bool,

  /// Configuration overrides for the component, `Name.Sub=Value`.
  #[arg(long = "setconfig")]
  config_overrides: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
  Start,
  Update,
  List,
  Stop,
  Kill,
}

impl Action {
  fn as_str(&self) -> &'static str {
    match self {
      Action::Start => "start",
      Action::Update => "update",
      Action::List => "list",
      Action::Stop => "stop",
      Action::Kill => "kill",
    }
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  logger::init(&LogConfig::default())?;

  let cli = Cli::parse();

  let mut project_json = config::load_project_config_json(&cli.config_file)?;
  config::apply_overrides_to_named_component(
    &mut project_json,
    &cli.component_name,
    &cli.config_overrides,
  )?;
  let project: entities::ProjectConfig = serde_json::from_value(project_json)?;

  let engine = Arc::new(BollardEngine::connect()?);
  let metadata = Arc::new(MetadataStore::open("./.gantry_metadata").await?);
  let proxy = Arc::new(TcpProxy::new("0.0.0.0:0".parse()?));
  let machine_id = uuid::Uuid::new_v4().to_string();

  let manager = RuntimeManager::new(
    &project,
    engine,
    metadata,
    proxy,
    "127.0.0.1".to_string(),
    machine_id,
  );

  let component = manager
    .component(&cli.component_name)
    .ok_or_else(|| anyhow::anyhow!("unknown component: {}", cli.component_name))?;

  let should_monitor = actions::run(cli.action.as_str(), component, &manager).await?;

  if should_monitor && cli.monitor {
    info!("starting monitoring of component: {}", cli.component_name);
    tokio::select! {
      _ = monitor(component, &manager) => {},
      _ = tokio::signal::ctrl_c() => {
        info!("terminating monitoring of component: {}", cli.component_name);
      }
    }
  }

  manager.join().await
}

/// Mirrors `gantry.py`'s `monitor()`: every 30 seconds, check the
/// component's health and restart it (kill then update) on failure.
async fn monitor(component: &Component, manager: &RuntimeManager) {
  loop {
    tokio::time::sleep(MONITOR_INTERVAL).await;

    info!("checking in on component {}", component.name());
    if component.healthy().await {
      continue;
    }

    warn!(
      "component {} is not healthy, killing and restarting",
      component.name()
    );
    if let Err(error) = component.stop(manager, true).await {
      error!(%error, "failed to kill unhealthy component");
    }
    if let Err(error) = component.update(manager).await {
      error!(%error, "could not restart component {}", component.name());
      return;
    }
  }
}
