use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use vigil_core::{api, config, state};

#[macro_use]
extern crate tracing;

async fn app() -> anyhow::Result<()> {
  let config = config::core_config();
  logger::init(&config.logging)?;

  info!("Vigil version: v{}", env!("CARGO_PKG_VERSION"));
  if config.pretty_startup_config {
    info!("{:#?}", config.sanitized());
  } else {
    info!("{:?}", config.sanitized());
  }

  rustls::crypto::aws_lc_rs::default_provider()
    .install_default()
    .expect("failed to install default crypto provider");

  let (app, instances, config_rx) =
    state::App::initialize(config)?;

  if app.tokens.is_empty() {
    warn!(
      "no api tokens configured: every request will be rejected. \
       Set VIGIL_API_TOKENS or provide {:?}",
      config.api_tokens_path
    );
  }
  info!("monitoring {} configured instance(s)", instances.len());

  tokio::spawn(app.monitor.clone().run(instances, config_rx));

  let handle = axum_server::Handle::new();
  spawn_shutdown_watcher(app.clone(), handle.clone());

  let addr: SocketAddr =
    format!("{}:{}", config.bind_ip, config.port)
      .parse()
      .context("invalid bind address")?;
  let router = api::router(app)
    .into_make_service_with_connect_info::<SocketAddr>();

  if config.ssl_enabled {
    info!("🔒 https listening on {addr}");
    let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(
      &config.ssl_cert_file,
      &config.ssl_key_file,
    )
    .await
    .context("failed to load ssl certificate")?;
    axum_server::bind_rustls(addr, tls)
      .handle(handle)
      .serve(router)
      .await?;
  } else {
    info!("🖥️ http listening on {addr}");
    axum_server::bind(addr).handle(handle).serve(router).await?;
  }

  Ok(())
}

/// Shutdown propagates through one cancellation: the monitor tasks
/// observe it at every suspension point, and the http server gets a
/// two second grace window.
fn spawn_shutdown_watcher(
  app: std::sync::Arc<state::App>,
  handle: axum_server::Handle<SocketAddr>,
) {
  tokio::spawn(async move {
    let terminate = async {
      match tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::terminate(),
      ) {
        Ok(mut signal) => {
          signal.recv().await;
        }
        Err(e) => {
          error!("failed to install SIGTERM handler | {e:?}");
          std::future::pending::<()>().await;
        }
      }
    };
    tokio::select! {
      _ = terminate => {}
      _ = tokio::signal::ctrl_c() => {}
    }
    info!("shutdown signal received");
    app.monitor.shutdown();
    handle.graceful_shutdown(Some(Duration::from_secs(2)));
  });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  app().await
}
