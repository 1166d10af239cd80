use std::path::Path;

use anyhow::{Context, anyhow};
use serde::de::DeserializeOwned;

/// Loads and merges TOML config files in path order.
/// Later files override earlier ones.
pub struct ConfigLoader<'a> {
  /// Paths to search, in priority order (lowest first).
  /// Missing paths are skipped.
  pub paths: &'a [&'a Path],
  /// Merge tables key by key rather than replacing them whole.
  pub merge_nested: bool,
  /// Extend arrays instead of replacing them.
  pub extend_array: bool,
  /// Print the merged config before deserializing.
  pub debug_print: bool,
}

impl ConfigLoader<'_> {
  pub fn load<T: DeserializeOwned>(self) -> anyhow::Result<T> {
    let mut merged = toml::Table::new();

    for path in self.paths {
      if !path.exists() {
        continue;
      }
      let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {path:?}"))?;
      let table: toml::Table = toml::from_str(&contents)
        .with_context(|| format!("invalid toml at {path:?}"))?;
      merge_table(
        &mut merged,
        table,
        self.merge_nested,
        self.extend_array,
      );
    }

    if self.debug_print {
      println!("{merged:#?}");
    }

    T::deserialize(toml::Value::Table(merged))
      .map_err(|e| anyhow!("{e}"))
      .context("failed to deserialize merged config")
  }
}

fn merge_table(
  base: &mut toml::Table,
  incoming: toml::Table,
  merge_nested: bool,
  extend_array: bool,
) {
  for (key, value) in incoming {
    match (base.get_mut(&key), value) {
      (
        Some(toml::Value::Table(base_table)),
        toml::Value::Table(incoming_table),
      ) if merge_nested => {
        merge_table(
          base_table,
          incoming_table,
          merge_nested,
          extend_array,
        );
      }
      (
        Some(toml::Value::Array(base_array)),
        toml::Value::Array(incoming_array),
      ) if extend_array => {
        base_array.extend(incoming_array);
      }
      (_, value) => {
        base.insert(key, value);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn later_values_override_earlier() {
    let mut base: toml::Table =
      toml::from_str("port = 7655\nbind_ip = \"0.0.0.0\"").unwrap();
    let incoming: toml::Table =
      toml::from_str("port = 9120").unwrap();
    merge_table(&mut base, incoming, true, false);
    assert_eq!(base["port"], toml::Value::Integer(9120));
    assert_eq!(
      base["bind_ip"],
      toml::Value::String("0.0.0.0".into())
    );
  }

  #[test]
  fn nested_tables_merge_key_by_key() {
    let mut base: toml::Table =
      toml::from_str("[logging]\nlevel = \"info\"\npretty = true")
        .unwrap();
    let incoming: toml::Table =
      toml::from_str("[logging]\nlevel = \"debug\"").unwrap();
    merge_table(&mut base, incoming, true, false);
    let logging = base["logging"].as_table().unwrap();
    assert_eq!(logging["level"], toml::Value::String("debug".into()));
    assert_eq!(logging["pretty"], toml::Value::Boolean(true));
  }
}
