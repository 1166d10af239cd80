//! The monitor orchestrator.
//!
//! Owns one cooperative task per configured instance. Each task
//! carries its own circuit breaker, decides its next interval through
//! the adaptive scheduler, polls through the typed client, writes the
//! store and sweeps the alert manager. Docker agents are push-based
//! and never scheduled here.

use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use cache::CloneCache;
use proxmox_client::{ProxmoxClient, error::Error as ClientError};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use vigil_client::entities::{
  ConnectionHealth, ConnectionState, InstanceKind,
  alert::AlertsConfig,
  config::core::CoreConfig,
  instance::Instance,
  vigil_timestamp,
};

use crate::{alert::AlertManager, store::Store};

pub mod breaker;
pub mod scheduler;
pub mod tracker;

mod pbs;
mod pmg;
mod pve;

use breaker::{BreakerParams, BreakerState, CircuitBreaker};
use scheduler::{PVE_BASE_INTERVAL, SchedulerInputs, effective_interval};
use tracker::{StalenessBounds, StalenessTracker};

/// Configuration reloads arrive as explicit events; file watching is
/// an external collaborator.
#[derive(Debug, Clone)]
pub enum ConfigChange {
  Instances(Vec<Instance>),
  Alerts(AlertsConfig),
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
  pub pbs_interval: Duration,
  pub pmg_interval: Duration,
  pub connection_timeout: Duration,
  pub adaptive_enabled: bool,
  pub adaptive_min: Duration,
  pub adaptive_max: Duration,
  pub pbs_concurrency: usize,
  pub pmg_concurrency: usize,
  pub breaker: BreakerParams,
  pub staleness: StalenessBounds,
}

impl From<&CoreConfig> for MonitorSettings {
  fn from(config: &CoreConfig) -> Self {
    MonitorSettings {
      pbs_interval: Duration::from_secs(config.pbs_polling_interval),
      pmg_interval: Duration::from_secs(config.pmg_polling_interval),
      connection_timeout: Duration::from_secs(
        config.connection_timeout,
      ),
      adaptive_enabled: config.adaptive_polling_enabled,
      adaptive_min: Duration::from_secs(
        config.adaptive_polling_min_interval,
      ),
      adaptive_max: Duration::from_secs(
        config.adaptive_polling_max_interval,
      ),
      pbs_concurrency: config.pbs_max_concurrency,
      pmg_concurrency: config.pmg_max_concurrency,
      breaker: BreakerParams {
        open_threshold: config.breaker_open_threshold,
        retry_interval_ms: (config.breaker_retry_interval * 1000)
          as i64,
        max_delay_ms: (config.breaker_max_delay * 1000) as i64,
        half_open_window_ms: (config.breaker_half_open_window
          * 1000) as i64,
      },
      staleness: StalenessBounds {
        min_stale_ms: (config.staleness_min * 1000) as i64,
        max_stale_ms: (config.staleness_max * 1000) as i64,
      },
    }
  }
}

#[derive(Clone)]
struct TaskHandle {
  cancel: CancellationToken,
  instance: Instance,
}

pub struct Monitor {
  store: Arc<Store>,
  alerts: Arc<AlertManager>,
  tracker: Arc<StalenessTracker>,
  settings: MonitorSettings,
  instances: ArcSwap<Vec<Instance>>,
  tasks: CloneCache<String, TaskHandle>,
  cancel: CancellationToken,
  pbs_limit: Arc<Semaphore>,
  pmg_limit: Arc<Semaphore>,
}

fn task_key(instance: &Instance) -> String {
  format!("{}:{}", instance.kind, instance.id)
}

impl Monitor {
  pub fn new(
    store: Arc<Store>,
    alerts: Arc<AlertManager>,
    settings: MonitorSettings,
  ) -> Arc<Monitor> {
    Arc::new(Monitor {
      tracker: Arc::new(StalenessTracker::new(settings.staleness)),
      pbs_limit: Arc::new(Semaphore::new(settings.pbs_concurrency)),
      pmg_limit: Arc::new(Semaphore::new(settings.pmg_concurrency)),
      instances: ArcSwap::from_pointee(Vec::new()),
      tasks: CloneCache::default(),
      cancel: CancellationToken::new(),
      store,
      alerts,
      settings,
    })
  }

  pub fn tracker(&self) -> &StalenessTracker {
    &self.tracker
  }

  pub fn instances(&self) -> Arc<Vec<Instance>> {
    self.instances.load_full()
  }

  /// Propagates to every instance task; all suspension points
  /// observe it, so shutdown completes within a couple of seconds.
  pub fn shutdown(&self) {
    self.cancel.cancel();
  }

  /// Apply the initial instance set and then consume config changes
  /// until shutdown.
  pub async fn run(
    self: Arc<Self>,
    initial: Vec<Instance>,
    mut config_rx: mpsc::Receiver<ConfigChange>,
  ) {
    self.apply_instances(initial).await;
    loop {
      tokio::select! {
        change = config_rx.recv() => match change {
          Some(ConfigChange::Instances(instances)) => {
            self.apply_instances(instances).await;
          }
          Some(ConfigChange::Alerts(config)) => {
            tracing::info!("applying new alert configuration");
            self.alerts.update_config(config);
          }
          None => break,
        },
        _ = self.cancel.cancelled() => break,
      }
    }
  }

  /// Diff the configured set against running tasks: stop removed or
  /// changed instances, start new ones.
  async fn apply_instances(
    self: &Arc<Self>,
    instances: Vec<Instance>,
  ) {
    let keyed: Vec<(String, Instance)> = instances
      .iter()
      .filter(|i| i.kind != InstanceKind::DockerAgent)
      .map(|i| (task_key(i), i.clone()))
      .collect();

    for (key, handle) in self.tasks.get_entries().await {
      let wanted =
        keyed.iter().find(|(k, _)| *k == key).map(|(_, i)| i);
      match wanted {
        Some(instance) if *instance == handle.instance => {}
        Some(_) | None => {
          handle.cancel.cancel();
          self.tasks.remove(&key).await;
          if wanted.is_none() {
            tracing::info!(instance = %key, "instance removed");
            self.store.prune_instance(
              handle.instance.kind,
              &handle.instance.id,
            );
            self
              .tracker
              .remove(handle.instance.kind, &handle.instance.id);
          }
        }
      }
    }

    for (key, instance) in keyed {
      if self.tasks.get(&key).await.is_some() {
        continue;
      }
      self.spawn_instance_task(key, instance).await;
    }

    self.instances.store(Arc::new(instances));
  }

  async fn spawn_instance_task(
    self: &Arc<Self>,
    key: String,
    instance: Instance,
  ) {
    let cancel = self.cancel.child_token();
    self
      .tasks
      .insert(
        key.clone(),
        TaskHandle { cancel: cancel.clone(), instance: instance.clone() },
      )
      .await;
    let monitor = self.clone();
    tokio::spawn(async move {
      tracing::info!(instance = %key, "starting instance task");
      monitor.instance_loop(instance, cancel).await;
      tracing::info!(instance = %key, "instance task stopped");
    });
  }

  async fn instance_loop(
    self: Arc<Self>,
    instance: Instance,
    cancel: CancellationToken,
  ) {
    let client = match ProxmoxClient::new(
      &instance,
      self.settings.connection_timeout,
    ) {
      Ok(client) => client,
      Err(e) => {
        tracing::error!(
          instance = %instance.id,
          "instance misconfigured, not scheduling | {e}"
        );
        self.set_health(
          &instance,
          ConnectionState::Offline,
          Some(e.to_string()),
          None,
        );
        return;
      }
    };
    let breaker = CircuitBreaker::new(self.settings.breaker);
    let base = match instance.kind {
      InstanceKind::Pve => PVE_BASE_INTERVAL,
      InstanceKind::Pbs => self.settings.pbs_interval,
      _ => self.settings.pmg_interval,
    };

    loop {
      if cancel.is_cancelled() {
        return;
      }
      let now = vigil_timestamp();
      if breaker.allow(now) {
        let stop = tokio::select! {
          stop = self.poll_once(&client, &instance, &breaker) => stop,
          _ = cancel.cancelled() => return,
        };
        if stop {
          return;
        }
        if client.endpoints.any_offline() {
          tokio::select! {
            _ = client.probe_offline_endpoints() => {}
            _ = cancel.cancelled() => return,
          }
        }
      } else {
        self.set_health(
          &instance,
          ConnectionState::Offline,
          None,
          Some(&breaker),
        );
      }

      let status = breaker.status();
      let now = vigil_timestamp();
      let entry =
        self.tracker.entry(instance.kind, &instance.id);
      let interval = effective_interval(SchedulerInputs {
        base,
        adaptive_enabled: self.settings.adaptive_enabled,
        breaker_open_for: (status.state == BreakerState::Open)
          .then(|| {
            Duration::from_millis(
              (status.retry_at - now).max(0) as u64
            )
          }),
        stable_polls: entry.stable_polls,
        staleness: self.tracker.score(
          instance.kind,
          &instance.id,
          now,
        ),
        min: self.settings.adaptive_min,
        max: self.settings.adaptive_max,
      });
      tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = cancel.cancelled() => return,
      }
    }
  }

  /// One poll. Returns true when the task must stop (fatal config).
  async fn poll_once(
    &self,
    client: &ProxmoxClient,
    instance: &Instance,
    breaker: &CircuitBreaker,
  ) -> bool {
    // Slow kinds share a bounded permit pool.
    let _permit = match instance.kind {
      InstanceKind::Pbs => {
        self.pbs_limit.clone().acquire_owned().await.ok()
      }
      InstanceKind::Pmg => {
        self.pmg_limit.clone().acquire_owned().await.ok()
      }
      _ => None,
    };

    let now = vigil_timestamp();
    let result = match instance.kind {
      InstanceKind::Pve => pve::poll_pve(
        client, instance, &self.store, &self.alerts, now,
      )
      .await
      .map(|outcome| (outcome.change_hash, outcome.degraded)),
      InstanceKind::Pbs => pbs::poll_pbs(
        client, instance, &self.store, &self.alerts, now,
      )
      .await
      .map(|hash| (hash, false)),
      _ => pmg::poll_pmg(
        client, instance, &self.store, &self.alerts, now,
      )
      .await
      .map(|hash| (hash, false)),
    };

    let now = vigil_timestamp();
    match result {
      Ok((hash, degraded)) => {
        breaker.on_success();
        self.tracker.record_success(
          instance.kind,
          &instance.id,
          now,
          hash,
        );
        let state = if degraded {
          ConnectionState::Degraded
        } else {
          ConnectionState::Online
        };
        self.set_health(instance, state, None, Some(breaker));
        false
      }
      Err(e) => {
        self.tracker.record_error(
          instance.kind,
          &instance.id,
          now,
          e.to_string(),
        );
        match &e {
          ClientError::Retryable(_) | ClientError::Timeout(_) => {
            breaker.on_failure(now);
            tracing::warn!(
              instance = %instance.id,
              "poll failed | {e}"
            );
            self.set_health(
              instance,
              ConnectionState::Offline,
              Some(e.to_string()),
              Some(breaker),
            );
            false
          }
          // Auth problems surface as degraded without growing the
          // backoff: hammering a wrong password helps nobody.
          ClientError::Auth(_) => {
            tracing::warn!(
              instance = %instance.id,
              "authentication failing | {e}"
            );
            self.set_health(
              instance,
              ConnectionState::Degraded,
              Some(e.to_string()),
              Some(breaker),
            );
            false
          }
          // Entity-level 404s never reach here: the poll routines
          // prune the vanished resource at the call site
          // (store.prune_entity). A top-level 404 means the api
          // surface itself is missing.
          ClientError::NotFound(_) => {
            tracing::warn!(
              instance = %instance.id,
              "api endpoint missing | {e}"
            );
            self.set_health(
              instance,
              ConnectionState::Degraded,
              Some(e.to_string()),
              Some(breaker),
            );
            false
          }
          ClientError::Protocol(_) => {
            // Leave the previous bucket in place.
            tracing::warn!(
              instance = %instance.id,
              "poll returned unusable payload | {e}"
            );
            self.set_health(
              instance,
              ConnectionState::Degraded,
              Some(e.to_string()),
              Some(breaker),
            );
            false
          }
          ClientError::Fatal(_) => {
            tracing::error!(
              instance = %instance.id,
              "fatal error, stopping instance task | {e}"
            );
            self.set_health(
              instance,
              ConnectionState::Offline,
              Some(e.to_string()),
              Some(breaker),
            );
            true
          }
        }
      }
    }
  }

  fn set_health(
    &self,
    instance: &Instance,
    state: ConnectionState,
    error: Option<String>,
    breaker: Option<&CircuitBreaker>,
  ) {
    let entry = self.tracker.entry(instance.kind, &instance.id);
    let status = breaker.map(|b| b.status()).unwrap_or_default();
    self.store.set_connection_health(
      instance.kind,
      &instance.id,
      ConnectionHealth {
        state,
        last_success: entry.last_success,
        last_error: entry.last_error,
        error: error.or(entry.last_error_message),
        breaker_state: status.state.to_string(),
        next_retry: status.retry_at,
      },
    );
  }
}
