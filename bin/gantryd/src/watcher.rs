use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use entities::{ComponentState, ComponentStatus, paths};
use kvstore::{KvError, KvStore};
use runtime::RuntimeManager;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

const CHECK_SLEEP_TIME: Duration = Duration::from_secs(30);
const CHECK_SHORT_SLEEP_TIME: Duration = Duration::from_secs(10);
const MONITOR_SLEEP_TIME: Duration = Duration::from_secs(30);

/// Watches one component's distributed status in the key-value store
/// and drives its update/stop/kill lifecycle on this host, restarting
/// it locally if it becomes unhealthy while marked `ready`.
pub struct ComponentWatcher {
  component_name: String,
  project_name: String,
  machine_id: String,
  kv: Arc<dyn KvStore>,
  manager: Arc<RuntimeManager>,
  is_running: AtomicBool,
  monitor_notify: Notify,
  update_lock: Mutex<()>,
}

impl ComponentWatcher {
  pub fn new(
    component_name: String,
    project_name: String,
    machine_id: String,
    kv: Arc<dyn KvStore>,
    manager: Arc<RuntimeManager>,
  ) -> Arc<Self> {
    Arc::new(ComponentWatcher {
      component_name,
      project_name,
      machine_id,
      kv,
      manager,
      is_running: AtomicBool::new(false),
      monitor_notify: Notify::new(),
      update_lock: Mutex::new(()),
    })
  }

  /// Spawns the command-watcher and liveness-monitor tasks.
  pub fn spawn(self: &Arc<Self>) {
    let command = self.clone();
    tokio::spawn(async move { command.wait_for_command().await });

    let monitor = self.clone();
    tokio::spawn(async move { monitor.monitor_component().await });
  }

  fn state_path(&self) -> String {
    paths::component_state_path(&self.project_name, &self.component_name)
  }

  async fn wait_for_command(&self) {
    let mut sleep_time = Duration::ZERO;
    let mut is_initial_loop = true;
    let path = self.state_path();

    loop {
      tokio::time::sleep(sleep_time).await;
      sleep_time = CHECK_SLEEP_TIME;

      let raw = match self.kv.get(&path).await {
        Ok(raw) => raw,
        Err(error) => {
          warn!(component = %self.component_name, %error, "failed to read component state");
          continue;
        }
      };

      let was_initial_loop = is_initial_loop;
      is_initial_loop = false;

      let Some(raw) = raw else { continue };
      let Some(state) = ComponentState::from_json(&raw) else {
        warn!(component = %self.component_name, "ignoring unparseable component state");
        continue;
      };

      sleep_time = match state.status {
        ComponentStatus::Stopped => self.handle_stopped(was_initial_loop).await,
        ComponentStatus::Killed => self.handle_killed(was_initial_loop).await,
        ComponentStatus::Ready | ComponentStatus::Pullfail => {
          let _guard = self.update_lock.lock().await;
          self.handle_ready(&path, &raw, &state).await
        }
        ComponentStatus::Updating | ComponentStatus::Updatefail => CHECK_SLEEP_TIME,
      };
    }
  }

  async fn handle_stopped(&self, was_initial_loop: bool) -> Duration {
    if was_initial_loop {
      info!(component = %self.component_name, "component is marked as stopped");
    }
    self.is_running.store(false, Ordering::SeqCst);
    self.stop(false).await;
    CHECK_SLEEP_TIME
  }

  async fn handle_killed(&self, was_initial_loop: bool) -> Duration {
    if was_initial_loop {
      info!(component = %self.component_name, "component is marked as killed");
    }
    self.is_running.store(false, Ordering::SeqCst);
    self.stop(true).await;
    CHECK_SLEEP_TIME
  }

  async fn stop(&self, kill: bool) {
    let Some(component) = self.manager.component(&self.component_name) else {
      return;
    };
    if let Err(error) = component.stop(&self.manager, kill).await {
      warn!(component = %self.component_name, %error, "failed to stop component");
    }
  }

  /// Called with `update_lock` held. Starts (or restarts) the
  /// component if its image id differs from the published one, or if
  /// it's simply not running locally yet.
  async fn handle_ready(&self, path: &str, raw_state: &str, state: &ComponentState) -> Duration {
    let Some(component) = self.manager.component(&self.component_name) else {
      return CHECK_SLEEP_TIME;
    };

    let image_id = component.image_id().await.unwrap_or_default();
    let imageid_different = state.imageid.as_deref() != Some(image_id.as_str());
    let should_update = !self.is_running.load(Ordering::SeqCst) || imageid_different;
    if !should_update {
      return CHECK_SLEEP_TIME;
    }

    self.is_running.store(false, Ordering::SeqCst);
    if imageid_different {
      info!(component = %self.component_name, "detected pushed update");
    } else {
      info!(component = %self.component_name, "component is not running; starting");
    }

    let updating = ComponentState::updating(self.machine_id.clone());
    let updating_json = updating.to_json();
    match self.kv.compare_and_set(path, Some(raw_state), &updating_json).await {
      Ok(()) => {}
      Err(KvError::CasConflict { .. }) => {
        info!(component = %self.component_name, "could not grab update lock, retrying shortly");
        return CHECK_SHORT_SLEEP_TIME;
      }
      Err(error) => {
        warn!(component = %self.component_name, %error, "failed to grab update lock");
        return CHECK_SHORT_SLEEP_TIME;
      }
    }

    if imageid_different && !component.pull_repo().await {
      warn!(component = %self.component_name, "image pull failed");
      let pullfail = ComponentState::pullfail(self.machine_id.clone());
      let _ = self
        .kv
        .compare_and_set(path, Some(&updating_json), &pullfail.to_json())
        .await;
      return CHECK_SLEEP_TIME;
    }

    if let Err(error) = component.update(&self.manager).await {
      error!(component = %self.component_name, %error, "update failed");
      let updatefail = ComponentState::updatefail(self.machine_id.clone());
      let _ = self
        .kv
        .compare_and_set(path, Some(&updating_json), &updatefail.to_json())
        .await;
      return CHECK_SLEEP_TIME;
    }

    if imageid_different {
      info!(component = %self.component_name, "update completed");
    } else {
      info!(component = %self.component_name, "component is now running");
    }

    let ready_image = component.image_id().await.unwrap_or(image_id);
    let _ = self.kv.set(path, &ComponentState::ready(ready_image).to_json(), None).await;

    self.is_running.store(true, Ordering::SeqCst);
    self.monitor_notify.notify_one();

    CHECK_SLEEP_TIME
  }

  async fn monitor_component(&self) {
    loop {
      if !self.is_running.load(Ordering::SeqCst) {
        self.monitor_notify.notified().await;
      }
      tokio::time::sleep(MONITOR_SLEEP_TIME).await;
      if !self.is_running.load(Ordering::SeqCst) {
        continue;
      }

      debug!(component = %self.component_name, "checking in on component");
      let Some(component) = self.manager.component(&self.component_name) else {
        return;
      };
      if component.healthy().await {
        continue;
      }

      let _guard = self.update_lock.lock().await;
      if !self.is_running.load(Ordering::SeqCst) {
        continue;
      }

      let path = self.state_path();
      let currently_ready = matches!(
        self.kv.get(&path).await.ok().flatten().and_then(|raw| ComponentState::from_json(&raw)),
        Some(ComponentState { status: ComponentStatus::Ready, .. })
      );
      if !currently_ready {
        continue;
      }

      warn!(component = %self.component_name, "component is not healthy, restarting");
      if component.update(&self.manager).await.is_err() {
        error!(component = %self.component_name, "could not restart component");
        self.is_running.store(false, Ordering::SeqCst);
      }
    }
  }
}
