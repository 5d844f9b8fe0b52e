use std::sync::Arc;

use entities::{ComponentState, paths};
use kvstore::KvStore;

/// Reads the raw JSON configuration document for `project`, if any
/// has ever been published (`gantry setconfig`).
pub async fn get_config_json(
  kv: &dyn KvStore,
  project: &str,
) -> anyhow::Result<Option<String>> {
  Ok(kv.get(&paths::project_config_path(project)).await?)
}

/// Publishes a project's configuration document.
pub async fn set_config(kv: &dyn KvStore, project: &str, config_json: &str) -> anyhow::Result<()> {
  // Round-trip through `serde_json::Value` so a malformed config file
  // fails fast, locally, instead of being written to the store.
  let value: serde_json::Value = serde_json::from_str(config_json)?;
  let compact = serde_json::to_string(&value)?;
  kv.set(&paths::project_config_path(project), &compact, None).await?;
  Ok(())
}

/// Marks every named component as `stopped`, for every host's watcher
/// to notice and drain.
pub async fn stop_components(
  kv: &dyn KvStore,
  project: &str,
  components: &[String],
) -> anyhow::Result<()> {
  for component in components {
    let path = paths::component_state_path(project, component);
    kv.set(&path, &ComponentState::stopped().to_json(), None).await?;
  }
  Ok(())
}

/// Marks every named component as `killed`.
pub async fn kill_components(
  kv: &dyn KvStore,
  project: &str,
  components: &[String],
) -> anyhow::Result<()> {
  for component in components {
    let path = paths::component_state_path(project, component);
    kv.set(&path, &ComponentState::killed().to_json(), None).await?;
  }
  Ok(())
}

/// Marks every named component as `ready` at its current image id, so
/// watchers pick up a freshly pushed image on their next poll.
pub async fn mark_updated(
  kv: &dyn KvStore,
  project: &str,
  manager: &Arc<runtime::RuntimeManager>,
  components: &[String],
) -> anyhow::Result<()> {
  for name in components {
    let component = manager
      .component(name)
      .ok_or_else(|| anyhow::anyhow!("unknown component named {name}"))?;
    let image_id = component.image_id().await?;
    println!("{name}->{}", &image_id[..image_id.len().min(12)]);
    let path = paths::component_state_path(project, name);
    kv.set(&path, &ComponentState::ready(image_id).to_json(), None).await?;
  }
  Ok(())
}

/// Prints the distributed status of every component in the project.
pub async fn list_status(
  kv: &dyn KvStore,
  project: &str,
  components: &[String],
) -> anyhow::Result<()> {
  println!("{:<20} {:<20} {:<20}", "COMPONENT", "STATUS", "IMAGE ID");
  for name in components {
    let path = paths::component_state_path(project, name);
    let state = kv
      .get(&path)
      .await?
      .as_deref()
      .and_then(ComponentState::from_json);
    let status = state
      .as_ref()
      .map(|s| s.status.to_string())
      .unwrap_or_else(|| "unknown".to_string());
    let imageid = state.and_then(|s| s.imageid).unwrap_or_default();
    println!("{name:<20} {status:<20} {imageid:<20}");
  }
  Ok(())
}
