//! Shared wire-level plumbing for the `/api2/json` endpoints.

use serde::{Deserialize, Deserializer};

/// Every Proxmox response wraps its payload in `{"data": ...}`.
#[derive(Deserialize, Debug)]
pub struct ApiData<T> {
  pub data: T,
}

#[derive(Deserialize, Debug)]
pub struct TicketData {
  pub ticket: String,
  #[serde(rename = "CSRFPreventionToken", default)]
  pub csrf_prevention_token: String,
}

/// The APIs mix `0`/`1`, booleans and numeric strings freely.
pub fn bool_from_int<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<bool, D::Error> {
  match serde_json::Value::deserialize(deserializer)? {
    serde_json::Value::Bool(b) => Ok(b),
    serde_json::Value::Number(n) => {
      Ok(n.as_f64().unwrap_or_default() != 0.0)
    }
    serde_json::Value::String(s) => Ok(s == "1" || s == "true"),
    _ => Ok(false),
  }
}

pub fn f64_flexible<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<f64, D::Error> {
  match serde_json::Value::deserialize(deserializer)? {
    serde_json::Value::Number(n) => Ok(n.as_f64().unwrap_or_default()),
    serde_json::Value::String(s) => Ok(s.parse().unwrap_or_default()),
    _ => Ok(0.0),
  }
}

pub fn u64_flexible<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<u64, D::Error> {
  match serde_json::Value::deserialize(deserializer)? {
    serde_json::Value::Number(n) => {
      Ok(n.as_u64().unwrap_or_else(|| {
        n.as_f64().unwrap_or_default().max(0.0) as u64
      }))
    }
    serde_json::Value::String(s) => Ok(s.parse().unwrap_or_default()),
    _ => Ok(0),
  }
}

#[cfg(test)]
mod tests {
  use serde::Deserialize;

  #[derive(Deserialize)]
  struct Mixed {
    #[serde(deserialize_with = "super::bool_from_int")]
    flag: bool,
    #[serde(deserialize_with = "super::u64_flexible")]
    count: u64,
    #[serde(deserialize_with = "super::f64_flexible")]
    load: f64,
  }

  #[test]
  fn flexible_fields_accept_numbers_and_strings() {
    let mixed: Mixed = serde_json::from_str(
      r#"{"flag": 1, "count": "42", "load": "0.25"}"#,
    )
    .unwrap();
    assert!(mixed.flag);
    assert_eq!(mixed.count, 42);
    assert!((mixed.load - 0.25).abs() < f64::EPSILON);

    let mixed: Mixed = serde_json::from_str(
      r#"{"flag": false, "count": 42, "load": 0.25}"#,
    )
    .unwrap();
    assert!(!mixed.flag);
    assert_eq!(mixed.count, 42);
  }
}
