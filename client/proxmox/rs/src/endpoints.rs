use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
  error::{Error, Result},
  host::normalize_host,
};

/// Ordered cluster endpoints with per-endpoint health.
///
/// Calls try the first online endpoint; transport failures demote an
/// endpoint until a probe against `/version` succeeds again. The set
/// is self-healing: a fully offline pool still yields candidates so
/// recovery is possible without operator action.
#[derive(Debug)]
pub struct EndpointPool {
  endpoints: Vec<Endpoint>,
}

#[derive(Debug)]
struct Endpoint {
  base: String,
  online: AtomicBool,
}

impl EndpointPool {
  pub fn new(raw: &[String], default_port: u16) -> Result<EndpointPool> {
    if raw.is_empty() {
      return Err(Error::Fatal("no endpoints configured".to_string()));
    }
    let endpoints = raw
      .iter()
      .map(|host| {
        Ok(Endpoint {
          base: normalize_host(host, default_port)?,
          online: AtomicBool::new(true),
        })
      })
      .collect::<Result<Vec<_>>>()?;
    Ok(EndpointPool { endpoints })
  }

  /// Online endpoints in configured order, then offline ones as a
  /// last resort.
  pub fn candidates(&self) -> Vec<String> {
    let mut online = Vec::new();
    let mut offline = Vec::new();
    for endpoint in &self.endpoints {
      if endpoint.online.load(Ordering::Relaxed) {
        online.push(endpoint.base.clone());
      } else {
        offline.push(endpoint.base.clone());
      }
    }
    online.extend(offline);
    online
  }

  pub fn mark_offline(&self, base: &str) {
    if let Some(endpoint) =
      self.endpoints.iter().find(|e| e.base == base)
    {
      endpoint.online.store(false, Ordering::Relaxed);
    }
  }

  pub fn mark_online(&self, base: &str) {
    if let Some(endpoint) =
      self.endpoints.iter().find(|e| e.base == base)
    {
      endpoint.online.store(true, Ordering::Relaxed);
    }
  }

  pub fn offline(&self) -> Vec<String> {
    self
      .endpoints
      .iter()
      .filter(|e| !e.online.load(Ordering::Relaxed))
      .map(|e| e.base.clone())
      .collect()
  }

  pub fn any_offline(&self) -> bool {
    self
      .endpoints
      .iter()
      .any(|e| !e.online.load(Ordering::Relaxed))
  }

  pub fn len(&self) -> usize {
    self.endpoints.len()
  }

  pub fn is_empty(&self) -> bool {
    self.endpoints.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pool() -> EndpointPool {
    EndpointPool::new(
      &["a.lan".to_string(), "b.lan".to_string(), "c.lan".to_string()],
      8006,
    )
    .unwrap()
  }

  #[test]
  fn offline_endpoints_move_to_the_back() {
    let pool = pool();
    pool.mark_offline("https://a.lan:8006");
    let candidates = pool.candidates();
    assert_eq!(
      candidates,
      vec![
        "https://b.lan:8006",
        "https://c.lan:8006",
        "https://a.lan:8006"
      ]
    );
  }

  #[test]
  fn probe_success_restores_order() {
    let pool = pool();
    pool.mark_offline("https://a.lan:8006");
    pool.mark_online("https://a.lan:8006");
    assert_eq!(
      pool.candidates()[0],
      "https://a.lan:8006".to_string()
    );
    assert!(!pool.any_offline());
  }

  #[test]
  fn empty_pool_is_fatal() {
    assert!(matches!(
      EndpointPool::new(&[], 8006),
      Err(Error::Fatal(_))
    ));
  }
}
