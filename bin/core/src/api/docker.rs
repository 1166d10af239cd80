use std::{net::SocketAddr, sync::Arc};

use axum::{
  Json,
  extract::{ConnectInfo, Path, State},
  http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use serror::AddStatusCode;
use vigil_client::entities::{
  docker::{
    AgentReport, DockerCommandStatus, DockerHostCommand,
    ReportResponse,
  },
  vigil_timestamp,
};

use crate::{api::authenticate, state::App};

/// `POST /api/docker/report` — the agent heartbeat. The reply
/// carries any queued command for the host.
pub async fn report(
  State(app): State<Arc<App>>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  Json(report): Json<AgentReport>,
) -> serror::Result<Json<ReportResponse>> {
  authenticate(&app, &headers, addr.ip()).await?;
  let response =
    app.docker.ingest_report(report, vigil_timestamp());
  Ok(Json(response))
}

#[derive(Deserialize, Debug)]
pub struct AckBody {
  pub host_id: String,
  pub status: DockerCommandStatus,
  #[serde(default)]
  pub message: Option<String>,
}

/// `POST /api/docker/command/{id}/ack`
pub async fn ack(
  State(app): State<Arc<App>>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  Path(command_id): Path<String>,
  Json(body): Json<AckBody>,
) -> serror::Result<Json<DockerHostCommand>> {
  authenticate(&app, &headers, addr.ip()).await?;
  let command = app
    .docker
    .acknowledge(
      &command_id,
      &body.host_id,
      body.status,
      body.message,
      vigil_timestamp(),
    )
    .status_code(StatusCode::BAD_REQUEST)?;
  Ok(Json(command))
}

/// `DELETE /api/docker/hosts/{id}` — operator removal of a host
/// that stopped reporting. A live agent re-registers on its next
/// heartbeat.
pub async fn remove_host(
  State(app): State<Arc<App>>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  Path(host_id): Path<String>,
) -> serror::Result<axum::http::StatusCode> {
  authenticate(&app, &headers, addr.ip()).await?;
  app
    .docker
    .remove_host(&host_id)
    .status_code(StatusCode::NOT_FOUND)?;
  Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/docker/hosts/{id}/stop` — operator action queueing an
/// uninstall command for the agent's next heartbeat.
pub async fn queue_stop(
  State(app): State<Arc<App>>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  Path(host_id): Path<String>,
) -> serror::Result<Json<DockerHostCommand>> {
  authenticate(&app, &headers, addr.ip()).await?;
  let command = app
    .docker
    .queue_stop_command(&host_id, vigil_timestamp())
    .status_code(StatusCode::CONFLICT)?;
  Ok(Json(command))
}
