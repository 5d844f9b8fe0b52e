#[macro_use]
extern crate tracing;

mod client;
mod watcher;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dockerengine::BollardEngine;
use entities::{MachineState, ProjectConfig, paths};
use kvstore::{EtcdStore, KvStore};
use logger::LogConfig;
use metadata::MetadataStore;
use proxy::TcpProxy;
use runtime::RuntimeManager;
use watcher::ComponentWatcher;

/// How often this machine renews its liveness record (§5.2); the
/// record's TTL is `paths::MACHINE_STATE_TTL_SECS`.
const REPORT_INTERVAL: Duration = Duration::from_secs(paths::MACHINE_STATE_TTL_SECS - 5);

#[derive(Parser)]
#[command(name = "gantryd", version, about = "gantryd continuous deployment daemon")]
struct Cli {
  /// The action to perform.
  action: Action,

  /// The project this daemon instance belongs to.
  project: String,

  /// Configuration file to publish; only used by `setconfig`.
  configfile: Option<PathBuf>,

  /// Component(s) to watch/run or to target for update/stop/kill.
  #[arg(short = 'c', long = "component", num_args = 1..)]
  component: Vec<String>,

  /// Address of the etcd v3 JSON gateway to coordinate through.
  #[arg(long = "etcd", default_value = "127.0.0.1:2379")]
  etcd_host: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
  Run,
  Getconfig,
  Setconfig,
  List,
  Update,
  Stop,
  Kill,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  logger::init(&LogConfig::default())?;

  let cli = Cli::parse();
  let kv: Arc<dyn KvStore> = Arc::new(EtcdStore::new(format!("http://{}", cli.etcd_host)));

  match cli.action {
    Action::Getconfig => getconfig(kv.as_ref(), &cli.project).await,
    Action::Setconfig => setconfig(kv.as_ref(), &cli.project, cli.configfile).await,
    Action::Run => run(kv, &cli.project, &cli.component).await,
    Action::List => list(kv.as_ref(), &cli.project).await,
    Action::Update => mark_updated(kv.as_ref(), &cli.project, &cli.component).await,
    Action::Stop => stop(kv.as_ref(), &cli.project, &cli.component).await,
    Action::Kill => kill(kv.as_ref(), &cli.project, &cli.component).await,
  }
}

async fn getconfig(kv: &dyn KvStore, project: &str) -> anyhow::Result<()> {
  match client::get_config_json(kv, project).await? {
    Some(raw) => {
      let value: serde_json::Value = serde_json::from_str(&raw)?;
      println!("{}", serde_json::to_string_pretty(&value)?);
    }
    None => println!("No config found"),
  }
  Ok(())
}

async fn setconfig(
  kv: &dyn KvStore,
  project: &str,
  configfile: Option<PathBuf>,
) -> anyhow::Result<()> {
  let configfile = configfile.ok_or_else(|| anyhow::anyhow!("setconfig requires a configfile argument"))?;
  let raw = fs::read_to_string(&configfile)
    .map_err(|e| anyhow::anyhow!("could not read {}: {e}", configfile.display()))?;
  client::set_config(kv, project, &raw).await?;
  println!("Configuration updated");
  Ok(())
}

async fn load_project(kv: &dyn KvStore, project: &str) -> anyhow::Result<ProjectConfig> {
  let raw = client::get_config_json(kv, project)
    .await?
    .ok_or_else(|| anyhow::anyhow!("unknown project {project}"))?;
  serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("error parsing gantry config: {e}"))
}

async fn build_manager(project: &ProjectConfig, machine_id: String) -> anyhow::Result<Arc<RuntimeManager>> {
  let engine = Arc::new(BollardEngine::connect()?);
  let metadata = Arc::new(MetadataStore::open("./.gantry_metadata").await?);
  let proxy = Arc::new(TcpProxy::new("0.0.0.0:0".parse()?));
  Ok(Arc::new(RuntimeManager::new(
    project,
    engine,
    metadata,
    proxy,
    "127.0.0.1".to_string(),
    machine_id,
  )))
}

fn require_known(manager: &RuntimeManager, names: &[String]) -> anyhow::Result<()> {
  for name in names {
    if manager.component(name).is_none() {
      anyhow::bail!("unknown component named {name}");
    }
  }
  Ok(())
}

async fn list(kv: &dyn KvStore, project: &str) -> anyhow::Result<()> {
  let config = load_project(kv, project).await?;
  let machine_id = uuid::Uuid::new_v4().to_string();
  let manager = build_manager(&config, machine_id).await?;
  let names: Vec<String> = config.components.iter().map(|c| c.name.clone()).collect();
  require_known(&manager, &names)?;
  client::list_status(kv, project, &names).await
}

async fn mark_updated(kv: &dyn KvStore, project: &str, components: &[String]) -> anyhow::Result<()> {
  let config = load_project(kv, project).await?;
  let machine_id = uuid::Uuid::new_v4().to_string();
  let manager = build_manager(&config, machine_id).await?;
  require_known(&manager, components)?;
  println!("Updating the image IDs on components");
  client::mark_updated(kv, project, &manager, components).await
}

async fn stop(kv: &dyn KvStore, project: &str, components: &[String]) -> anyhow::Result<()> {
  let config = load_project(kv, project).await?;
  let machine_id = uuid::Uuid::new_v4().to_string();
  let manager = build_manager(&config, machine_id).await?;
  require_known(&manager, components)?;
  println!("Marking components as stopped");
  client::stop_components(kv, project, components).await
}

async fn kill(kv: &dyn KvStore, project: &str, components: &[String]) -> anyhow::Result<()> {
  let config = load_project(kv, project).await?;
  let machine_id = uuid::Uuid::new_v4().to_string();
  let manager = build_manager(&config, machine_id).await?;
  require_known(&manager, components)?;
  println!("Marking components as killed");
  client::kill_components(kv, project, components).await
}

async fn run(kv: Arc<dyn KvStore>, project: &str, components: &[String]) -> anyhow::Result<()> {
  if components.is_empty() {
    anyhow::bail!("`run` requires at least one -c component");
  }

  let config = load_project(kv.as_ref(), project).await?;
  let machine_id = uuid::Uuid::new_v4().to_string();
  let manager = build_manager(&config, machine_id.clone()).await?;
  require_known(&manager, components)?;

  info!(project, "gantryd running");
  for name in components {
    ComponentWatcher::new(
      name.clone(),
      project.to_string(),
      machine_id.clone(),
      kv.clone(),
      manager.clone(),
    )
    .spawn();
  }

  let reporter = tokio::spawn(report_machine_status(
    kv.clone(),
    project.to_string(),
    machine_id.clone(),
    components.to_vec(),
  ));

  tokio::signal::ctrl_c().await.ok();
  info!("shutting down gantryd");
  reporter.abort();

  let path = paths::machine_state_path(project, &machine_id);
  if let Err(error) = kv.delete(&path).await {
    warn!(%error, "failed to remove machine state on shutdown");
  }
  manager.join().await
}

/// Mirrors `GantryDClient.reportMachineStatus`: periodically refreshes
/// this host's liveness record (§5.2) so a crashed host's record
/// expires rather than lingering.
async fn report_machine_status(
  kv: Arc<dyn KvStore>,
  project: String,
  machine_id: String,
  components: Vec<String>,
) {
  let path = paths::machine_state_path(&project, &machine_id);
  let ip = local_ip();
  loop {
    debug!(machine_id = %machine_id, "reporting machine status");
    let state = MachineState::running(components.clone(), ip.clone());
    if let Err(error) = kv
      .set(&path, &state.to_json(), Some(paths::MACHINE_STATE_TTL_SECS))
      .await
    {
      warn!(%error, "failed to report machine status");
    }
    tokio::time::sleep(REPORT_INTERVAL).await;
  }
}

/// Best-effort local network address: binds a UDP socket and "connects"
/// it to an external address so the OS picks the outbound interface,
/// without actually sending any packets.
fn local_ip() -> String {
  std::net::UdpSocket::bind("0.0.0.0:0")
    .and_then(|socket| {
      socket.connect("8.8.8.8:80")?;
      socket.local_addr()
    })
    .map(|addr| addr.ip().to_string())
    .unwrap_or_else(|_| "127.0.0.1".to_string())
}
