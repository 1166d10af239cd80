//! Typed, read-only clients for the Proxmox VE / Backup Server /
//! Mail Gateway HTTP APIs.
//!
//! One [ProxmoxClient] serves one monitored instance. It owns the
//! instance's endpoint pool, TLS policy and auth session, and
//! exposes the per-product operations from the `pve` / `pbs` / `pmg`
//! modules. All calls return the uniform [error::Error] taxonomy.

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use vigil_client::entities::{
  InstanceKind,
  instance::{Instance, InstanceCredentials},
};

pub mod endpoints;
pub mod error;
pub mod host;
pub mod tls;

mod pbs;
mod pmg;
mod pve;
mod wire;

pub use pbs::*;
pub use pmg::*;
pub use pve::*;

use crate::{
  endpoints::EndpointPool,
  error::{Error, Result},
};

/// Proxmox tickets are valid for two hours; refresh at 80%.
const TICKET_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const TICKET_REFRESH_FRACTION: f64 = 0.8;

/// Probes against offline endpoints use a short deadline so a dead
/// member cannot stall the caller.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn default_port(kind: InstanceKind) -> u16 {
  match kind {
    InstanceKind::Pbs => 8007,
    _ => 8006,
  }
}

#[derive(Debug, Clone)]
struct Session {
  ticket: String,
  #[allow(dead_code)]
  csrf: String,
  refresh_at: Instant,
}

pub struct ProxmoxClient {
  pub kind: InstanceKind,
  pub instance_id: String,
  pub endpoints: EndpointPool,
  credentials: InstanceCredentials,
  http: reqwest::Client,
  /// Mutex rather than RwLock: refreshes must not stampede.
  session: Mutex<Option<Session>>,
  timeout: Duration,
}

impl ProxmoxClient {
  pub fn new(
    instance: &Instance,
    timeout: Duration,
  ) -> Result<ProxmoxClient> {
    instance
      .validate()
      .map_err(|e| Error::Fatal(format!("{e:#}")))?;
    let endpoints = EndpointPool::new(
      &instance.endpoints,
      default_port(instance.kind),
    )?;
    let mut builder = reqwest::Client::builder()
      .pool_max_idle_per_host(4)
      .connect_timeout(Duration::from_secs(10));
    if !instance.tls_fingerprints.is_empty() {
      builder = builder.use_preconfigured_tls(
        tls::FingerprintVerifier::client_config(
          &instance.tls_fingerprints,
        ),
      );
    } else if !instance.tls_verify {
      builder = builder.danger_accept_invalid_certs(true);
    }
    let http = builder
      .build()
      .map_err(|e| Error::Fatal(format!("http client | {e}")))?;
    Ok(ProxmoxClient {
      kind: instance.kind,
      instance_id: instance.id.clone(),
      endpoints,
      credentials: instance.credentials.clone(),
      http,
      session: Mutex::new(None),
      timeout,
    })
  }

  /// GET `{base}/api2/json{path}` with endpoint failover, bounded by
  /// the configured connection timeout.
  pub async fn get<T: DeserializeOwned>(
    &self,
    path: &str,
  ) -> Result<T> {
    self.get_with_query(path, &[]).await
  }

  pub async fn get_with_query<T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<T> {
    match tokio::time::timeout(
      self.timeout,
      self.get_failover(path, query),
    )
    .await
    {
      Ok(res) => res,
      Err(_) => Err(Error::Timeout(self.timeout)),
    }
  }

  async fn get_failover<T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<T> {
    let mut last_err = None;
    for base in self.endpoints.candidates() {
      match self.get_from(&base, path, query).await {
        Ok(data) => {
          self.endpoints.mark_online(&base);
          return Ok(data);
        }
        Err(Error::Retryable(reason)) => {
          tracing::debug!(
            instance = %self.instance_id,
            endpoint = %base,
            "endpoint failed, trying next | {reason}"
          );
          self.endpoints.mark_offline(&base);
          last_err = Some(Error::Retryable(reason));
        }
        // Auth / NotFound / Protocol mean the endpoint answered.
        Err(e) => return Err(e),
      }
    }
    Err(
      last_err
        .unwrap_or_else(|| Error::Retryable("no endpoints".into())),
    )
  }

  async fn get_from<T: DeserializeOwned>(
    &self,
    base: &str,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<T> {
    let url = format!("{base}/api2/json{path}");
    let mut refreshed = false;
    loop {
      let mut request = self.http.get(&url);
      if !query.is_empty() {
        request = request.query(query);
      }
      request = self.apply_auth(request).await?;
      let response = request
        .send()
        .await
        .map_err(|e| Error::from_transport(e, path))?;
      let status = response.status();
      // A stale ticket earns exactly one forced refresh per call.
      if status == StatusCode::UNAUTHORIZED
        && !refreshed
        && matches!(
          self.credentials,
          InstanceCredentials::Password { .. }
        )
      {
        refreshed = true;
        self.refresh_session(true).await?;
        continue;
      }
      if !status.is_success() {
        return Err(Error::from_status(status, path));
      }
      let body: wire::ApiData<T> = response
        .json()
        .await
        .map_err(|e| Error::Protocol(format!("{path} | {e}")))?;
      return Ok(body.data);
    }
  }

  async fn apply_auth(
    &self,
    request: reqwest::RequestBuilder,
  ) -> Result<reqwest::RequestBuilder> {
    match &self.credentials {
      InstanceCredentials::Token { token_id, secret } => {
        let header = match self.kind {
          InstanceKind::Pve => {
            format!("PVEAPIToken={token_id}={secret}")
          }
          InstanceKind::Pbs => {
            format!("PBSAPIToken={token_id}:{secret}")
          }
          _ => format!("PMGAPIToken={token_id}:{secret}"),
        };
        Ok(request.header(reqwest::header::AUTHORIZATION, header))
      }
      InstanceCredentials::Password { .. } => {
        let ticket = self.refresh_session(false).await?;
        let cookie_name = match self.kind {
          InstanceKind::Pve => "PVEAuthCookie",
          InstanceKind::Pbs => "PBSAuthCookie",
          _ => "PMGAuthCookie",
        };
        Ok(request.header(
          reqwest::header::COOKIE,
          format!("{cookie_name}={ticket}"),
        ))
      }
    }
  }

  /// Obtain or reuse the session ticket. Serialized on a mutex so
  /// concurrent calls share one login.
  async fn refresh_session(&self, force: bool) -> Result<String> {
    let InstanceCredentials::Password {
      username,
      password,
      realm,
    } = &self.credentials
    else {
      return Err(Error::Fatal(
        "refresh_session called with token credentials".to_string(),
      ));
    };
    let mut session = self.session.lock().await;
    if !force
      && let Some(session) = session.as_ref()
      && session.refresh_at > Instant::now()
    {
      return Ok(session.ticket.clone());
    }

    let username = if username.contains('@') {
      username.clone()
    } else {
      format!("{username}@{realm}")
    };

    let mut last_err = None;
    for base in self.endpoints.candidates() {
      let url = format!("{base}/api2/json/access/ticket");
      let response = self
        .http
        .post(&url)
        .form(&[
          ("username", username.as_str()),
          ("password", password.as_str()),
        ])
        .send()
        .await;
      let response = match response {
        Ok(response) => response,
        Err(e) => {
          self.endpoints.mark_offline(&base);
          last_err = Some(Error::from_transport(e, "/access/ticket"));
          continue;
        }
      };
      let status = response.status();
      if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
      {
        return Err(Error::Auth(format!(
          "login rejected for '{username}'"
        )));
      }
      if !status.is_success() {
        return Err(Error::from_status(status, "/access/ticket"));
      }
      let body: wire::ApiData<wire::TicketData> =
        response.json().await.map_err(|e| {
          Error::Protocol(format!("/access/ticket | {e}"))
        })?;
      let refresh_in = Duration::from_secs_f64(
        TICKET_TTL.as_secs_f64() * TICKET_REFRESH_FRACTION,
      );
      let ticket = body.data.ticket;
      *session = Some(Session {
        ticket: ticket.clone(),
        csrf: body.data.csrf_prevention_token,
        refresh_at: Instant::now() + refresh_in,
      });
      self.endpoints.mark_online(&base);
      return Ok(ticket);
    }
    Err(
      last_err
        .unwrap_or_else(|| Error::Retryable("no endpoints".into())),
    )
  }

  /// Re-probe offline endpoints against `/version`, promoting the
  /// ones that answer. Called by the orchestrator between polls.
  pub async fn probe_offline_endpoints(&self) {
    for base in self.endpoints.offline() {
      let url = format!("{base}/api2/json/version");
      let request = match self.apply_auth(self.http.get(&url)).await {
        Ok(request) => request,
        Err(_) => return,
      };
      match tokio::time::timeout(PROBE_TIMEOUT, request.send()).await
      {
        Ok(Ok(response)) if response.status().is_success() => {
          tracing::info!(
            instance = %self.instance_id,
            endpoint = %base,
            "endpoint recovered"
          );
          self.endpoints.mark_online(&base);
        }
        _ => {}
      }
    }
  }
}
