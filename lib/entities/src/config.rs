use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The transport kind of a port mapping or component link.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
  Tcp,
  Http,
}

impl Default for PortKind {
  fn default() -> Self {
    PortKind::Tcp
  }
}

impl PortKind {
  pub fn is_http(&self) -> bool {
    matches!(self, PortKind::Http)
  }

  /// The scheme used when building `ALIAS_CLINK`-style env vars.
  pub fn scheme(&self) -> &'static str {
    match self {
      PortKind::Tcp => "tcp",
      PortKind::Http => "http",
    }
  }

  /// The suffix used in `ALIAS_CLINK_<port>_{TCP,HTTP}` env var names.
  pub fn env_suffix(&self) -> &'static str {
    match self {
      PortKind::Tcp => "TCP",
      PortKind::Http => "HTTP",
    }
  }
}

/// An external-to-container port mapping declared on a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
  pub external: u16,
  pub container: u16,
  #[serde(default)]
  pub kind: PortKind,
}

/// A host-path to container-path volume binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeBinding {
  #[serde(rename = "hostPath")]
  pub host_path: String,
  #[serde(rename = "containerPath")]
  pub container_path: String,
}

/// A single check or termination signal specification. The `kind`
/// selects the constructor out of the healthkit registry; `extras`
/// carries kind-specific fields (`port`, `path`, `exec_command`, …)
/// that the registry looks up by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSpec {
  pub kind: String,
  #[serde(default)]
  pub id: String,
  /// Seconds slept between failed attempts (not a per-attempt network
  /// timeout — see §4.6).
  #[serde(default = "default_check_timeout")]
  pub timeout: u64,
  #[serde(flatten)]
  pub extras: HashMap<String, serde_json::Value>,
}

fn default_check_timeout() -> u64 {
  3
}

impl CheckSpec {
  /// A descriptive title for log lines: the explicit id if set, else
  /// the check kind.
  pub fn title(&self) -> &str {
    if self.id.is_empty() { &self.kind } else { &self.id }
  }

  pub fn extra_str(&self, name: &str) -> Option<&str> {
    self.extras.get(name).and_then(|v| v.as_str())
  }

  pub fn extra_u64(&self, name: &str) -> Option<u64> {
    self.extras.get(name).and_then(|v| v.as_u64())
  }

  pub fn timeout_duration(&self) -> Duration {
    Duration::from_secs(self.timeout)
  }

  /// The built-in `connection` termination check, used as the
  /// default `terminationChecks` entry when a component declares
  /// none.
  pub fn builtin_connection() -> Self {
    CheckSpec {
      kind: "connection".to_string(),
      id: String::new(),
      timeout: default_check_timeout(),
      extras: HashMap::new(),
    }
  }
}

/// A network endpoint a component publishes for sibling components
/// to consume as a required link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinedComponentLink {
  pub name: String,
  pub port: u16,
  #[serde(default)]
  pub kind: PortKind,
}

/// A consumer declaration: this component wants the named peer link
/// injected into its environment under `alias`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredComponentLink {
  pub name: String,
  pub alias: String,
}

fn default_ready_timeout_millis() -> u64 {
  10_000
}

fn default_termination_checks() -> Vec<CheckSpec> {
  vec![CheckSpec::builtin_connection()]
}

/// The immutable, per-run configuration of a single component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
  pub name: String,
  pub repo: String,
  #[serde(default = "default_tag")]
  pub tag: String,
  #[serde(default)]
  pub command: Vec<String>,
  #[serde(default)]
  pub user: Option<String>,
  #[serde(default)]
  pub privileged: bool,
  #[serde(default)]
  pub ports: Vec<PortMapping>,
  #[serde(default)]
  pub bindings: Vec<VolumeBinding>,
  #[serde(rename = "readyChecks", default)]
  pub ready_checks: Vec<CheckSpec>,
  #[serde(rename = "healthChecks", default)]
  pub health_checks: Vec<CheckSpec>,
  #[serde(rename = "terminationChecks", default = "default_termination_checks")]
  pub termination_checks: Vec<CheckSpec>,
  #[serde(rename = "terminationSignals", default)]
  pub termination_signals: Vec<CheckSpec>,
  #[serde(rename = "readyTimeoutMillis", default = "default_ready_timeout_millis")]
  pub ready_timeout_millis: u64,
  #[serde(rename = "definedComponentLinks", default)]
  pub defined_component_links: Vec<DefinedComponentLink>,
  #[serde(rename = "requiredComponentLinks", default)]
  pub required_component_links: Vec<RequiredComponentLink>,
}

fn default_tag() -> String {
  "latest".to_string()
}

impl ComponentConfig {
  pub fn full_image(&self) -> String {
    format!("{}:{}", self.repo, self.tag)
  }

  pub fn command_string(&self) -> Option<String> {
    if self.command.is_empty() {
      None
    } else {
      Some(self.command.join(" "))
    }
  }

  pub fn ready_timeout(&self) -> Duration {
    Duration::from_millis(self.ready_timeout_millis)
  }

  /// The union of declared container ports and component-link
  /// container ports, which the engine must expose when creating the
  /// container.
  pub fn container_ports(&self) -> BTreeSet<u16> {
    let mut ports: BTreeSet<u16> =
      self.ports.iter().map(|p| p.container).collect();
    ports.extend(self.defined_component_links.iter().map(|l| l.port));
    ports
  }

  pub fn find_defined_link(
    &self,
    link_name: &str,
  ) -> Option<&DefinedComponentLink> {
    self
      .defined_component_links
      .iter()
      .find(|l| l.name == link_name)
  }
}

/// The whole project: every component known to this gantry
/// invocation, as loaded from a config file or the KV store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
  pub components: Vec<ComponentConfig>,
}

impl ProjectConfig {
  pub fn lookup_component(&self, name: &str) -> Option<&ComponentConfig> {
    self.components.iter().find(|c| c.name == name)
  }

  pub fn lookup_component_mut(
    &mut self,
    name: &str,
  ) -> Option<&mut ComponentConfig> {
    self.components.iter_mut().find(|c| c.name == name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn full_image_joins_repo_and_tag() {
    let c = ComponentConfig {
      name: "web".into(),
      repo: "acme/web".into(),
      tag: "latest".into(),
      command: vec![],
      user: None,
      privileged: false,
      ports: vec![],
      bindings: vec![],
      ready_checks: vec![],
      health_checks: vec![],
      termination_checks: default_termination_checks(),
      termination_signals: vec![],
      ready_timeout_millis: default_ready_timeout_millis(),
      defined_component_links: vec![],
      required_component_links: vec![],
    };
    assert_eq!(c.full_image(), "acme/web:latest");
  }

  #[test]
  fn container_ports_unions_mappings_and_links() {
    let json = serde_json::json!({
      "name": "web",
      "repo": "acme/web",
      "ports": [{"external": 80, "container": 8080, "kind": "http"}],
      "definedComponentLinks": [{"name": "admin", "port": 9000}]
    });
    let c: ComponentConfig = serde_json::from_value(json).unwrap();
    assert_eq!(
      c.container_ports().into_iter().collect::<Vec<_>>(),
      vec![8080, 9000]
    );
  }

  #[test]
  fn default_termination_check_is_connection() {
    let json = serde_json::json!({"name": "web", "repo": "acme/web"});
    let c: ComponentConfig = serde_json::from_value(json).unwrap();
    assert_eq!(c.termination_checks.len(), 1);
    assert_eq!(c.termination_checks[0].kind, "connection");
  }
}
