use std::fs;
use std::path::Path;

use anyhow::{Context, bail};
use serde_json::Value;

/// Reads a project configuration file as raw JSON, so overrides can be
/// applied before it is parsed into a typed `ProjectConfig`.
pub fn load_project_config_json(path: &Path) -> anyhow::Result<Value> {
  let raw = fs::read_to_string(path)
    .with_context(|| format!("could not find config file: {}", path.display()))?;
  serde_json::from_str(&raw).with_context(|| format!("error parsing gantry config at {}", path.display()))
}

/// Applies `--setconfig` overrides to the named component within a
/// parsed project document.
pub fn apply_overrides_to_named_component(
  project: &mut Value,
  component_name: &str,
  overrides: &[String],
) -> anyhow::Result<()> {
  if overrides.is_empty() {
    return Ok(());
  }
  let components = project
    .get_mut("components")
    .and_then(Value::as_array_mut)
    .context("project config is missing a `components` array")?;
  let component = components
    .iter_mut()
    .find(|c| c.get("name").and_then(Value::as_str) == Some(component_name))
    .with_context(|| format!("unknown component: {component_name}"))?;
  apply_overrides(component, overrides)
}

/// Applies `Name.Sub=Value` style overrides (`--setconfig`) to a
/// single component's configuration before it runs.
///
/// This is a scoped-down version of the dotted-path override language:
/// it walks plain object fields and, for list fields, matches entries
/// by their `name` or `id` key (creating one if no entry matches),
/// rather than reflecting over a field-metadata tree.
pub fn apply_overrides(component: &mut Value, overrides: &[String]) -> anyhow::Result<()> {
  for raw in overrides {
    let (path, value) = raw
      .split_once('=')
      .with_context(|| format!("override `{raw}` is not in `Name.Sub=Value` form"))?;
    let pieces: Vec<&str> = path.split('.').collect();
    apply_one(component, &pieces, value)
      .with_context(|| format!("failed to apply override `{raw}`"))?;
  }
  Ok(())
}

fn apply_one(node: &mut Value, pieces: &[&str], raw_value: &str) -> anyhow::Result<()> {
  let Value::Object(map) = node else {
    bail!("cannot override a field of a non-object value");
  };
  let field = pieces[0];
  let entry = map.entry(field.to_string()).or_insert(Value::Null);

  if pieces.len() == 1 {
    *entry = scalar(raw_value);
    return Ok(());
  }

  if entry.is_null() {
    *entry = Value::Object(Default::default());
  }

  match entry {
    Value::Array(items) => {
      let key = pieces[1];
      let idx = items.iter().position(|item| matches_key(item, key));
      let item = match idx {
        Some(i) => &mut items[i],
        None => {
          let mut fresh = serde_json::json!({});
          set_key_field(&mut fresh, key);
          items.push(fresh);
          items.last_mut().unwrap()
        }
      };
      if pieces.len() > 2 {
        apply_one(item, &pieces[2..], raw_value)?;
      }
      Ok(())
    }
    Value::Object(_) => apply_one(entry, &pieces[1..], raw_value),
    _ => bail!("field `{field}` does not support nested overrides"),
  }
}

fn matches_key(item: &Value, key: &str) -> bool {
  item.get("name").and_then(Value::as_str) == Some(key)
    || item.get("id").and_then(Value::as_str) == Some(key)
}

fn set_key_field(item: &mut Value, key: &str) {
  let field = if item.get("id").is_some() { "id" } else { "name" };
  item[field] = Value::String(key.to_string());
}

fn scalar(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn overrides_a_top_level_scalar_field() {
    let mut component = json!({"name": "web", "tag": "latest"});
    apply_overrides(&mut component, &["tag=1.2.3".to_string()]).unwrap();
    assert_eq!(component["tag"], json!("1.2.3"));
  }

  #[test]
  fn overrides_a_boolean_as_json_when_parseable() {
    let mut component = json!({"name": "web", "privileged": false});
    apply_overrides(&mut component, &["privileged=true".to_string()]).unwrap();
    assert_eq!(component["privileged"], json!(true));
  }

  #[test]
  fn overrides_a_named_list_entry_creating_it_if_absent() {
    let mut component = json!({
      "name": "web",
      "definedComponentLinks": [{"name": "admin", "port": 9000}],
    });
    apply_overrides(
      &mut component,
      &["definedComponentLinks.admin.port=9100".to_string()],
    )
    .unwrap();
    assert_eq!(component["definedComponentLinks"][0]["port"], json!(9100));

    apply_overrides(
      &mut component,
      &["definedComponentLinks.db.port=5432".to_string()],
    )
    .unwrap();
    assert_eq!(component["definedComponentLinks"].as_array().unwrap().len(), 2);
  }

  #[test]
  fn routes_overrides_to_the_named_component_only() {
    let mut project = json!({
      "components": [
        {"name": "web", "tag": "latest"},
        {"name": "db", "tag": "latest"},
      ]
    });
    apply_overrides_to_named_component(&mut project, "db", &["tag=9".to_string()]).unwrap();
    assert_eq!(project["components"][0]["tag"], json!("latest"));
    assert_eq!(project["components"][1]["tag"], json!("9"));
  }

  #[test]
  fn rejects_an_unknown_component_name() {
    let mut project = json!({"components": [{"name": "web"}]});
    let err =
      apply_overrides_to_named_component(&mut project, "missing", &["tag=9".to_string()])
        .unwrap_err();
    assert!(err.to_string().contains("unknown component"));
  }
}
