//! Shared fixtures for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ConflictResolver, SyncScheduler};
use crate::config::EngineConfig;
use crate::engine::SyncEngine;
use crate::models::PreferencesPatch;
use crate::network::{ConnectionKind, ManualNetworkMonitor, NetworkState};
use crate::remote::{RemoteEndpoint, RemoteOutcome, RemoteRequest};
use crate::storage::MemoryStore;

/// Remote that answers from per-entity scripts and records every request.
/// Unscripted requests are accepted.
#[derive(Default)]
pub struct ScriptedRemote {
    scripts: Mutex<HashMap<String, VecDeque<RemoteOutcome>>>,
    requests: Mutex<Vec<RemoteRequest>>,
    delay: Option<Duration>,
}

impl ScriptedRemote {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn script(&self, entity: &str, outcomes: impl IntoIterator<Item = RemoteOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(entity.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn entities(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| request.entity)
            .collect()
    }
}

#[async_trait]
impl RemoteEndpoint for ScriptedRemote {
    async fn send(&self, request: &RemoteRequest) -> RemoteOutcome {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&request.entity)
            .and_then(VecDeque::pop_front)
            .unwrap_or(RemoteOutcome::Accepted)
    }
}

/// Engine wired to in-memory collaborators: online over wifi, auto-sync off,
/// retry backoff disabled.
pub struct Harness {
    pub engine: SyncEngine,
    pub store: Arc<MemoryStore>,
    pub network: Arc<ManualNetworkMonitor>,
    pub remote: Arc<ScriptedRemote>,
    config: EngineConfig,
}

#[derive(Default)]
pub struct HarnessBuilder {
    remote_delay: Option<Duration>,
    auto_sync: bool,
}

impl HarnessBuilder {
    pub fn remote_delay(mut self, delay: Duration) -> Self {
        self.remote_delay = Some(delay);
        self
    }

    pub fn auto_sync(mut self) -> Self {
        self.auto_sync = true;
        self
    }

    pub async fn build(self) -> Harness {
        let remote = Arc::new(
            self.remote_delay
                .map_or_else(ScriptedRemote::default, ScriptedRemote::with_delay),
        );
        let config = EngineConfig {
            retry_backoff_base_ms: 0,
            ..EngineConfig::default()
        };
        let harness = Harness::open(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualNetworkMonitor::new(NetworkState::online(
                ConnectionKind::Wifi,
            ))),
            remote,
            config,
        )
        .await;
        harness
            .engine
            .update_preferences(PreferencesPatch {
                auto_sync: Some(self.auto_sync),
                ..PreferencesPatch::default()
            })
            .await
            .unwrap();
        harness
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    async fn open(
        store: Arc<MemoryStore>,
        network: Arc<ManualNetworkMonitor>,
        remote: Arc<ScriptedRemote>,
        config: EngineConfig,
    ) -> Self {
        let engine = SyncEngine::open(store.clone(), network.clone(), remote.clone(), config)
            .await
            .unwrap();
        Self {
            engine,
            store,
            network,
            remote,
            config,
        }
    }

    /// A fresh engine over the same store, as after a process restart
    pub async fn reopen(&self) -> Self {
        Self::open(
            self.store.clone(),
            self.network.clone(),
            self.remote.clone(),
            self.config,
        )
        .await
    }

    pub fn resolver(&self) -> &ConflictResolver {
        self.engine.resolver()
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        self.engine.scheduler()
    }
}
