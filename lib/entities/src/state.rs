use serde::{Deserialize, Serialize};

/// Distributed status of a component, as recorded in the KV store at
/// `/gantryd/projects/<p>/components/<c>/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
  Ready,
  Stopped,
  Killed,
  Updating,
  Pullfail,
  Updatefail,
}

impl std::fmt::Display for ComponentStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ComponentStatus::Ready => "ready",
      ComponentStatus::Stopped => "stopped",
      ComponentStatus::Killed => "killed",
      ComponentStatus::Updating => "updating",
      ComponentStatus::Pullfail => "pullfail",
      ComponentStatus::Updatefail => "updatefail",
    };
    write!(f, "{s}")
  }
}

/// The CAS-backed distributed record for a single component.
///
/// `imageid` is populated when `status == Ready`; `machine` is
/// populated while a host holds the update lock
/// (`status` in `{Updating, Pullfail, Updatefail}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentState {
  pub status: ComponentStatus,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub imageid: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub machine: Option<String>,
}

impl ComponentState {
  pub fn ready(imageid: impl Into<String>) -> Self {
    ComponentState {
      status: ComponentStatus::Ready,
      imageid: Some(imageid.into()),
      machine: None,
    }
  }

  pub fn stopped() -> Self {
    ComponentState {
      status: ComponentStatus::Stopped,
      imageid: None,
      machine: None,
    }
  }

  pub fn killed() -> Self {
    ComponentState {
      status: ComponentStatus::Killed,
      imageid: None,
      machine: None,
    }
  }

  pub fn updating(machine: impl Into<String>) -> Self {
    ComponentState {
      status: ComponentStatus::Updating,
      imageid: None,
      machine: Some(machine.into()),
    }
  }

  pub fn pullfail(machine: impl Into<String>) -> Self {
    ComponentState {
      status: ComponentStatus::Pullfail,
      imageid: None,
      machine: Some(machine.into()),
    }
  }

  pub fn updatefail(machine: impl Into<String>) -> Self {
    ComponentState {
      status: ComponentStatus::Updatefail,
      imageid: None,
      machine: Some(machine.into()),
    }
  }

  /// Serializes to the compact JSON form stored verbatim as the KV
  /// value (mirrors `json.dumps(..., separators=(',',':'))` in the
  /// original `EtcdState`).
  pub fn to_json(&self) -> String {
    serde_json::to_string(self).expect("ComponentState always serializes")
  }

  pub fn from_json(raw: &str) -> Option<Self> {
    serde_json::from_str(raw).ok()
  }
}

/// Liveness status of a host, written with a TTL at
/// `/gantryd/projects/<p>/machines/<mid>/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
  Running,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineState {
  pub status: MachineStatus,
  pub components: Vec<String>,
  pub ip: String,
}

impl MachineState {
  pub fn running(components: Vec<String>, ip: String) -> Self {
    MachineState {
      status: MachineStatus::Running,
      components,
      ip,
    }
  }

  pub fn to_json(&self) -> String {
    serde_json::to_string(self).expect("MachineState always serializes")
  }
}

/// Locally persisted per-container status (§4.1); absence of a record
/// degrades to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerStatus {
  Starting,
  Running,
  Draining,
  ShuttingDown,
  Unknown,
}

impl Default for ContainerStatus {
  fn default() -> Self {
    ContainerStatus::Unknown
  }
}

impl std::fmt::Display for ContainerStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ContainerStatus::Starting => "starting",
      ContainerStatus::Running => "running",
      ContainerStatus::Draining => "draining",
      ContainerStatus::ShuttingDown => "shutting-down",
      ContainerStatus::Unknown => "unknown",
    };
    write!(f, "{s}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_json() {
    let state = ComponentState::ready("sha256:abc123");
    let json = state.to_json();
    let parsed = ComponentState::from_json(&json).unwrap();
    assert_eq!(state, parsed);
  }

  #[test]
  fn updating_state_carries_machine_not_imageid() {
    let state = ComponentState::updating("host-1");
    assert_eq!(state.status, ComponentStatus::Updating);
    assert_eq!(state.machine.as_deref(), Some("host-1"));
    assert!(state.imageid.is_none());
  }
}
