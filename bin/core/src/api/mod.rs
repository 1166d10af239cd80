use std::{
  net::{IpAddr, SocketAddr},
  sync::Arc,
};

use anyhow::anyhow;
use axum::{
  Router,
  extract::{ConnectInfo, Path, State},
  http::{HeaderMap, HeaderValue, StatusCode},
  routing::{get, post},
};
use axum::Json;
use serde::Serialize;
use serror::{AddStatusCode, AddStatusCodeError};
use tower_http::cors::CorsLayer;
use vigil_client::entities::{
  ConnectionHealth, InstanceKind,
  alert::{Alert, ResolvedAlert},
  vigil_timestamp,
};

use crate::{
  state::App,
  store::WorldSnapshot,
};

mod docker;
mod ws;

pub fn router(app: Arc<App>) -> Router {
  Router::new()
    .route("/version", get(|| async { env!("CARGO_PKG_VERSION") }))
    .route(
      "/api/version",
      get(|| async { env!("CARGO_PKG_VERSION") }),
    )
    .route("/api/state", get(get_state))
    .route("/api/alerts", get(get_alerts))
    .route("/api/alerts/{id}/acknowledge", post(acknowledge_alert))
    .route("/api/alerts/{id}/resolve", post(resolve_alert))
    .route("/api/instances", get(get_instances))
    .route("/api/docker/report", post(docker::report))
    .route("/api/docker/command/{id}/ack", post(docker::ack))
    .route(
      "/api/docker/hosts/{id}/stop",
      post(docker::queue_stop),
    )
    .route(
      "/api/docker/hosts/{id}",
      axum::routing::delete(docker::remove_host),
    )
    .route("/ws", get(ws::handler))
    .layer(cors_layer(&app))
    .with_state(app)
}

fn cors_layer(app: &App) -> CorsLayer {
  let allowed_origins =
    if app.config.cors_allowed_origins.is_empty() {
      vec![HeaderValue::from_static("*")]
    } else {
      app
        .config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| {
          HeaderValue::from_str(origin)
            .inspect_err(|e| {
              tracing::warn!(
                "invalid CORS allowed origin: {origin} | {e:?}"
              )
            })
            .ok()
        })
        .collect()
    };
  CorsLayer::new()
    .allow_origin(allowed_origins)
    .allow_methods(tower_http::cors::Any)
    .allow_headers(tower_http::cors::Any)
}

/// Bearer token auth with failure-based rate limiting. Denials and
/// failed checks count against the source IP; successes never do.
pub async fn authenticate(
  app: &App,
  headers: &HeaderMap,
  socket_ip: IpAddr,
) -> serror::Result<()> {
  let ip = client_ip(headers, socket_ip);
  let now = vigil_timestamp();
  if let Err(retry_ms) = app.auth_limiter.check(ip, now) {
    return Err(
      anyhow!(
        "Too many failed attempts. Try again in {}s",
        (retry_ms + 999) / 1000
      )
      .status_code(StatusCode::TOO_MANY_REQUESTS),
    );
  }
  let Some(token) = bearer_token(headers) else {
    app.auth_limiter.record_failure(ip, now);
    return Err(
      anyhow!("missing bearer token")
        .status_code(StatusCode::UNAUTHORIZED),
    );
  };
  if app.tokens.check(token) {
    Ok(())
  } else {
    app.auth_limiter.record_failure(ip, now);
    Err(
      anyhow!("invalid api token")
        .status_code(StatusCode::UNAUTHORIZED),
    )
  }
}

/// Proxied requests carry the original client in x-forwarded-for
/// (first hop) or x-real-ip; direct connections fall back to the
/// socket address.
fn client_ip(headers: &HeaderMap, socket_ip: IpAddr) -> IpAddr {
  headers
    .get("x-forwarded-for")
    .and_then(|value| value.to_str().ok())
    .and_then(|chain| chain.split(',').next())
    .and_then(|ip| ip.trim().parse().ok())
    .or_else(|| {
      headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|ip| ip.trim().parse().ok())
    })
    .unwrap_or(socket_ip)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
  headers
    .get(axum::http::header::AUTHORIZATION)?
    .to_str()
    .ok()?
    .strip_prefix("Bearer ")
    .map(str::trim)
}

#[derive(Serialize)]
struct StateResponse {
  #[serde(flatten)]
  snapshot: WorldSnapshot,
  active_alerts: Vec<Alert>,
}

async fn get_state(
  State(app): State<Arc<App>>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
) -> serror::Result<Json<StateResponse>> {
  authenticate(&app, &headers, addr.ip()).await?;
  Ok(Json(StateResponse {
    snapshot: app.store.snapshot(),
    active_alerts: app.alerts.active(),
  }))
}

#[derive(Serialize)]
struct AlertsResponse {
  active: Vec<Alert>,
  resolved: Vec<ResolvedAlert>,
}

async fn get_alerts(
  State(app): State<Arc<App>>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
) -> serror::Result<Json<AlertsResponse>> {
  authenticate(&app, &headers, addr.ip()).await?;
  Ok(Json(AlertsResponse {
    active: app.alerts.active(),
    resolved: app.alerts.recently_resolved(),
  }))
}

async fn acknowledge_alert(
  State(app): State<Arc<App>>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> serror::Result<Json<Alert>> {
  authenticate(&app, &headers, addr.ip()).await?;
  let alert = app
    .alerts
    .acknowledge(&id)
    .status_code(StatusCode::NOT_FOUND)?;
  Ok(Json(alert))
}

async fn resolve_alert(
  State(app): State<Arc<App>>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> serror::Result<Json<ResolvedAlert>> {
  authenticate(&app, &headers, addr.ip()).await?;
  let resolved = app
    .alerts
    .resolve_manual(&id, vigil_client::entities::vigil_timestamp())
    .status_code(StatusCode::NOT_FOUND)?;
  Ok(Json(resolved))
}

#[derive(Serialize)]
struct InstanceStatus {
  kind: InstanceKind,
  id: String,
  display_name: String,
  health: ConnectionHealth,
}

async fn get_instances(
  State(app): State<Arc<App>>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
) -> serror::Result<Json<Vec<InstanceStatus>>> {
  authenticate(&app, &headers, addr.ip()).await?;
  let statuses = app
    .monitor
    .instances()
    .iter()
    .map(|instance| InstanceStatus {
      kind: instance.kind,
      id: instance.id.clone(),
      display_name: instance.display_name().to_string(),
      health: app
        .store
        .connection_health(instance.kind, &instance.id)
        .unwrap_or_default(),
    })
    .collect();
  Ok(Json(statuses))
}
