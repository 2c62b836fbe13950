//! Background reachability probe and one-shot model metadata fetch.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use shared::domain::{BackendStatus, HealthSnapshot, ModelMetadata};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::InferenceApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataState {
    Pending,
    Present(ModelMetadata),
    /// The fetch failed; tolerated silently and never retried.
    Absent,
}

impl MetadataState {
    pub fn metadata(&self) -> Option<&ModelMetadata> {
        match self {
            MetadataState::Present(metadata) => Some(metadata),
            _ => None,
        }
    }
}

pub struct HealthMonitor;

impl HealthMonitor {
    /// Spawns the periodic probe (first tick fires immediately) and the
    /// metadata fetch. Both stop when the returned handle is shut down or
    /// dropped.
    pub fn start(
        api: Arc<dyn InferenceApi>,
        probe_interval: Duration,
        probe_timeout: Duration,
    ) -> HealthMonitorHandle {
        let (health_tx, health_rx) = watch::channel(None);
        let (metadata_tx, metadata_rx) = watch::channel(MetadataState::Pending);

        let probe_api = Arc::clone(&api);
        let probe_task = tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let snapshot = probe_once(probe_api.as_ref(), probe_timeout).await;
                health_tx.send_modify(|current| {
                    log_transition(current.as_ref(), &snapshot);
                    *current = Some(snapshot);
                });
            }
        });

        let metadata_task = tokio::spawn(async move {
            let state = match fetch_metadata(api.as_ref(), probe_timeout).await {
                Some(metadata) => MetadataState::Present(metadata),
                None => MetadataState::Absent,
            };
            metadata_tx.send_replace(state);
        });

        HealthMonitorHandle {
            health: health_rx,
            metadata: metadata_rx,
            probe_task,
            metadata_task,
        }
    }
}

/// One health probe. Every failure collapses into an `Unreachable` snapshot.
pub async fn probe_once(api: &dyn InferenceApi, probe_timeout: Duration) -> HealthSnapshot {
    match timeout(probe_timeout, api.health()).await {
        Ok(Ok(response)) => response.into_snapshot(Utc::now()),
        Ok(Err(err)) => {
            debug!(%err, "health probe failed");
            HealthSnapshot::unreachable(Utc::now())
        }
        Err(_) => {
            debug!(timeout = ?probe_timeout, "health probe timed out");
            HealthSnapshot::unreachable(Utc::now())
        }
    }
}

pub async fn fetch_metadata(
    api: &dyn InferenceApi,
    fetch_timeout: Duration,
) -> Option<ModelMetadata> {
    match timeout(fetch_timeout, api.model_info()).await {
        Ok(Ok(info)) => Some(info.into()),
        Ok(Err(err)) => {
            debug!(%err, "model metadata unavailable");
            None
        }
        Err(_) => {
            debug!(timeout = ?fetch_timeout, "model metadata fetch timed out");
            None
        }
    }
}

fn log_transition(previous: Option<&HealthSnapshot>, next: &HealthSnapshot) {
    if previous.map(|p| (&p.status, p.model_loaded)) == Some((&next.status, next.model_loaded)) {
        return;
    }
    match &next.status {
        BackendStatus::Healthy => info!(model_loaded = next.model_loaded, "backend healthy"),
        BackendStatus::Degraded(reported) => {
            warn!(%reported, model_loaded = next.model_loaded, "backend reported unhealthy status")
        }
        BackendStatus::Unreachable => info!("backend unreachable"),
    }
}

pub struct HealthMonitorHandle {
    health: watch::Receiver<Option<HealthSnapshot>>,
    metadata: watch::Receiver<MetadataState>,
    probe_task: JoinHandle<()>,
    metadata_task: JoinHandle<()>,
}

impl HealthMonitorHandle {
    pub fn subscribe_health(&self) -> watch::Receiver<Option<HealthSnapshot>> {
        self.health.clone()
    }

    pub fn subscribe_metadata(&self) -> watch::Receiver<MetadataState> {
        self.metadata.clone()
    }

    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.health.borrow().clone()
    }

    pub fn metadata(&self) -> MetadataState {
        self.metadata.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.probe_task.is_finished()
    }

    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for HealthMonitorHandle {
    fn drop(&mut self) {
        self.probe_task.abort();
        self.metadata_task.abort();
    }
}

#[cfg(test)]
#[path = "tests/health_tests.rs"]
mod tests;
