//! KV store path layout (§6.2): `/gantryd/projects/<project>/...`.

const NAMESPACE: &str = "gantryd";

pub fn project_config_path(project: &str) -> String {
  format!("/{NAMESPACE}/projects/{project}/config")
}

pub fn component_state_path(project: &str, component: &str) -> String {
  format!("/{NAMESPACE}/projects/{project}/components/{component}/state")
}

pub fn machine_state_path(project: &str, machine_id: &str) -> String {
  format!("/{NAMESPACE}/projects/{project}/machines/{machine_id}/state")
}

/// TTL, in seconds, for a `MachineState` entry (§3, §6.2).
pub const MACHINE_STATE_TTL_SECS: u64 = 60;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builds_expected_paths() {
    assert_eq!(
      component_state_path("proj", "web"),
      "/gantryd/projects/proj/components/web/state"
    );
    assert_eq!(
      machine_state_path("proj", "host-1"),
      "/gantryd/projects/proj/machines/host-1/state"
    );
    assert_eq!(
      project_config_path("proj"),
      "/gantryd/projects/proj/config"
    );
  }
}
