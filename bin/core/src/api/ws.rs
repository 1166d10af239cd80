use std::{sync::Arc, time::Duration};

use axum::{
  extract::{
    State, WebSocketUpgrade,
    ws::{self, WebSocket},
  },
  response::Response,
};
use futures_util::SinkExt;
use tokio::sync::broadcast::error::RecvError;
use vigil_client::ws::{WsEvent, WsEventKind, WsLoginMessage};

use crate::state::App;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn handler(
  ws: WebSocketUpgrade,
  State(app): State<Arc<App>>,
) -> Response {
  ws.on_upgrade(move |socket| handle_socket(app, socket))
}

async fn handle_socket(app: Arc<App>, mut socket: WebSocket) {
  let login = tokio::time::timeout(LOGIN_TIMEOUT, socket.recv()).await;
  let token = match login {
    Ok(Some(Ok(ws::Message::Text(text)))) => {
      match WsLoginMessage::from_json_str(&text) {
        Ok(WsLoginMessage::Token { token }) => token,
        Err(e) => {
          let _ = socket.send(ws::Message::text(format!("{e:#}"))).await;
          let _ = socket.close().await;
          return;
        }
      }
    }
    _ => {
      let _ = socket
        .send(ws::Message::text("expected login message"))
        .await;
      let _ = socket.close().await;
      return;
    }
  };
  if !app.tokens.check(&token) {
    let _ = socket
      .send(ws::Message::text("failed to authenticate api token"))
      .await;
    let _ = socket.close().await;
    return;
  }
  let _ = socket.send(ws::Message::text("LOGGED_IN")).await;

  // Subscribe before the snapshot so no delta is lost in between.
  let mut events = app.store.subscribe();
  let sync = WsEvent::new(
    WsEventKind::Sync,
    serde_json::json!({
      "snapshot": app.store.snapshot(),
      "active_alerts": app.alerts.active(),
    }),
  );
  match sync.and_then(|e| Ok(serde_json::to_string(&e)?)) {
    Ok(payload) => {
      if socket.send(ws::Message::text(payload)).await.is_err() {
        return;
      }
    }
    Err(e) => {
      tracing::error!("failed to build sync event | {e:#}");
      return;
    }
  }

  let mut dropped: u64 = 0;
  loop {
    tokio::select! {
      event = events.recv() => match event {
        Ok(event) => {
          let Ok(payload) = serde_json::to_string(&event) else {
            continue;
          };
          if socket.send(ws::Message::text(payload)).await.is_err() {
            break;
          }
        }
        // The subscriber fell behind the bounded queue; events in
        // between are gone.
        Err(RecvError::Lagged(n)) => {
          dropped += n;
          tracing::warn!(
            "slow websocket subscriber dropped {n} events"
          );
        }
        Err(RecvError::Closed) => break,
      },
      incoming = socket.recv() => match incoming {
        None
        | Some(Err(_))
        | Some(Ok(ws::Message::Close(_))) => break,
        // Pings are answered by axum; ignore the rest.
        Some(Ok(_)) => {}
      },
    }
  }
  if dropped > 0 {
    tracing::info!(
      "websocket subscriber closed after dropping {dropped} events"
    );
  }
}
