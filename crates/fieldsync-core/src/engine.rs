//! Composition root wiring the sync components together.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::events::{EventBus, SyncEvent};
use crate::models::{
    ConflictId, NewSyncItem, PreferencesPatch, Resolution, SyncConflict, SyncItem, SyncItemId,
    SyncPreferences, SyncStats,
};
use crate::network::NetworkMonitor;
use crate::remote::RemoteEndpoint;
use crate::storage::PersistenceAdapter;
use crate::sync::{
    ConflictResolver, MergeFn, PreferencesStore, StatsTracker, SyncOutcome, SyncQueue,
    SyncScheduler,
};
use crate::Result;

/// One sync engine per installation.
///
/// Construct it at startup and share it (it is cheap to wrap in an `Arc`).
/// Dropping it stops the auto-sync loop and aborts sessions still running in
/// the background.
pub struct SyncEngine {
    queue: Arc<SyncQueue>,
    resolver: Arc<ConflictResolver>,
    stats: Arc<StatsTracker>,
    preferences: Arc<PreferencesStore>,
    scheduler: Arc<SyncScheduler>,
    events: EventBus,
    background: StdMutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Load persisted state and wire the components.
    pub async fn open(
        store: Arc<dyn PersistenceAdapter>,
        network: Arc<dyn NetworkMonitor>,
        remote: Arc<dyn RemoteEndpoint>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);

        let preferences = Arc::new(PreferencesStore::load(store.clone()).await?);
        let queue = Arc::new(
            SyncQueue::load(store.clone(), events.clone(), preferences.clone(), config).await?,
        );
        let resolver = Arc::new(
            ConflictResolver::load(
                store.clone(),
                remote.clone(),
                queue.clone(),
                events.clone(),
                config,
            )
            .await?,
        );
        let stats = Arc::new(StatsTracker::load(store).await?);
        let scheduler = Arc::new(SyncScheduler::new(
            queue.clone(),
            resolver.clone(),
            stats.clone(),
            preferences.clone(),
            network,
            remote,
            events.clone(),
            config,
        ));

        Ok(Self {
            queue,
            resolver,
            stats,
            preferences,
            scheduler,
            events,
            background: StdMutex::new(None),
        })
    }

    /// Queue a mutation; with auto-sync on, a session is requested right away.
    pub async fn enqueue(&self, item: NewSyncItem) -> Result<SyncItem> {
        let item = self.queue.enqueue(item).await?;
        self.after_enqueue();
        Ok(item)
    }

    /// Queue a mutation captured at `timestamp` (Unix ms).
    pub async fn enqueue_at(&self, item: NewSyncItem, timestamp: i64) -> Result<SyncItem> {
        let item = self.queue.enqueue_at(item, timestamp).await?;
        self.after_enqueue();
        Ok(item)
    }

    fn after_enqueue(&self) {
        if self.preferences.get().auto_sync {
            self.scheduler.request_sync();
        }
    }

    pub async fn list(&self) -> Vec<SyncItem> {
        self.queue.list().await
    }

    pub async fn get(&self, id: SyncItemId) -> Option<SyncItem> {
        self.queue.get(id).await
    }

    pub async fn conflicts(&self) -> Vec<SyncConflict> {
        self.resolver.list().await
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.get().await
    }

    pub fn preferences(&self) -> SyncPreferences {
        self.preferences.get()
    }

    /// Apply a partial preference update; the auto-sync timer follows it.
    pub async fn update_preferences(&self, patch: PreferencesPatch) -> Result<SyncPreferences> {
        self.preferences.update(patch).await
    }

    pub fn subscribe_preferences(&self) -> watch::Receiver<SyncPreferences> {
        self.preferences.subscribe()
    }

    pub async fn start_sync(&self) -> SyncOutcome {
        self.scheduler.start_sync().await
    }

    pub fn request_sync(&self) {
        self.scheduler.request_sync();
    }

    pub fn is_syncing(&self) -> bool {
        self.scheduler.is_running()
    }

    pub async fn resolve(&self, id: ConflictId, resolution: Resolution) -> Result<SyncConflict> {
        self.resolver.resolve(id, resolution).await
    }

    /// Re-arm a terminally failed item for the next session.
    pub async fn retry(&self, id: SyncItemId) -> Result<SyncItem> {
        let item = self.queue.retry(id).await?;
        self.after_enqueue();
        Ok(item)
    }

    pub fn register_merge(&self, entity: impl Into<String>, merge: MergeFn) {
        self.resolver.register_merge(entity, merge);
    }

    pub async fn prune_resolved_conflicts(&self, older_than: Duration) -> usize {
        self.resolver.prune_resolved(older_than).await
    }

    /// Receive every event published from now on; drop the receiver to stop.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Start the auto-sync loop (timer and reconnect trigger). Idempotent.
    pub fn start_background(&self) {
        let mut background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if background.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *background = Some(self.scheduler.spawn_background());
    }

    /// Wait for background-requested sessions to finish.
    pub async fn settle(&self) -> Vec<SyncOutcome> {
        self.scheduler.settle().await
    }

    /// Stop auto-sync and let a running session end after its current item.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    #[cfg(test)]
    pub(crate) fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    #[cfg(test)]
    pub(crate) fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        self.scheduler.abort_sessions();
        let background = self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = background.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncEngine")
            .field("syncing", &self.scheduler.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictStrategy, MutationType, Priority, SyncStatus};
    use crate::network::{ConnectionKind, NetworkState};
    use crate::remote::RemoteOutcome;
    use crate::sync::test_support::Harness;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn mutation(entity: &str, priority: Priority) -> NewSyncItem {
        NewSyncItem::new(MutationType::Create, entity, json!({"name": entity}), priority)
    }

    fn failure() -> RemoteOutcome {
        RemoteOutcome::Failed {
            message: "HTTP 503".to_string(),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn session_processes_priority_then_timestamp() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        engine.enqueue_at(mutation("A", Priority::Low), 1).await.unwrap();
        engine.enqueue_at(mutation("B", Priority::High), 2).await.unwrap();
        engine.enqueue_at(mutation("C", Priority::High), 0).await.unwrap();

        let outcome = engine.start_sync().await;
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
        assert_eq!(harness.remote.entities(), ["C", "B", "A"]);
        assert!(engine.list().await.is_empty());
    }

    #[tokio::test]
    async fn custom_priority_order_is_honored() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        engine
            .update_preferences(PreferencesPatch {
                priority_order: Some(vec![Priority::Medium, Priority::Low, Priority::High]),
                ..PreferencesPatch::default()
            })
            .await
            .unwrap();
        engine.enqueue_at(mutation("high", Priority::High), 0).await.unwrap();
        engine.enqueue_at(mutation("low", Priority::Low), 1).await.unwrap();
        engine.enqueue_at(mutation("medium", Priority::Medium), 2).await.unwrap();

        engine.start_sync().await;
        assert_eq!(harness.remote.entities(), ["medium", "low", "high"]);
    }

    #[tokio::test]
    async fn concurrent_start_sync_runs_one_session() {
        let harness = Harness::builder()
            .remote_delay(Duration::from_millis(50))
            .build()
            .await;
        let engine = &harness.engine;
        engine.enqueue(mutation("animals", Priority::High)).await.unwrap();
        let mut rx = engine.subscribe();

        let (first, second) = tokio::join!(engine.start_sync(), engine.start_sync());
        let outcomes = [first, second];
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| matches!(outcome, SyncOutcome::Completed(_)))
                .count(),
            1
        );
        assert!(outcomes.contains(&SyncOutcome::AlreadyRunning));

        let started = drain(&mut rx)
            .into_iter()
            .filter(|event| *event == SyncEvent::SessionStarted)
            .count();
        assert_eq!(started, 1);
        assert_eq!(harness.remote.requests().len(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded_by_max_retries() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        harness.remote.script("D", [failure(), failure(), failure(), failure()]);
        let item = engine.enqueue(mutation("D", Priority::High)).await.unwrap();
        let mut rx = engine.subscribe();

        for attempt in 1..=2 {
            engine.start_sync().await;
            let current = engine.get(item.id).await.unwrap();
            assert_eq!(current.retry_count, attempt);
            assert_eq!(current.status, SyncStatus::Pending);
        }
        engine.start_sync().await;

        let failed = engine.get(item.id).await.unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert_eq!(failed.retry_count, 3);
        assert_eq!(engine.list().await.len(), 1);
        assert!(drain(&mut rx)
            .iter()
            .any(|event| matches!(event, SyncEvent::ItemFailed(found) if found.id == item.id)));

        // terminal failures are not attempted again
        engine.start_sync().await;
        assert_eq!(harness.remote.requests().len(), 3);
        assert_eq!(engine.stats().await.failed_changes, 1);
    }

    #[tokio::test]
    async fn manual_retry_rearms_failed_item() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        harness.remote.script("D", [failure(), failure(), failure()]);
        let item = engine.enqueue(mutation("D", Priority::High)).await.unwrap();
        for _ in 0..3 {
            engine.start_sync().await;
        }

        engine.retry(item.id).await.unwrap();
        engine.start_sync().await;
        assert!(engine.get(item.id).await.is_none());
    }

    #[tokio::test]
    async fn conflict_is_held_not_failed_until_resolved() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        let remote_version = json!({"id": "e1", "name": "remote"});
        harness.remote.script(
            "E",
            [RemoteOutcome::Conflict {
                remote: remote_version.clone(),
            }],
        );
        let item = engine
            .enqueue(NewSyncItem::new(
                MutationType::Update,
                "E",
                json!({"id": "e1", "name": "local"}),
                Priority::Medium,
            ))
            .await
            .unwrap();

        let SyncOutcome::Completed(stats) = engine.start_sync().await else {
            panic!("session did not run");
        };
        assert_eq!(stats.conflicts_pending, 1);

        let held = engine.get(item.id).await.unwrap();
        assert_eq!(held.status, SyncStatus::Conflicted);
        assert_eq!(held.retry_count, 0);

        engine.start_sync().await;
        assert_eq!(harness.remote.requests().len(), 1);

        let conflicts = engine.conflicts().await;
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entity, "E");
        assert_eq!(conflicts[0].remote_version, remote_version);

        let resolved = engine
            .resolve(conflicts[0].id, Resolution::Remote)
            .await
            .unwrap();
        assert_eq!(resolved.resolution, Some(Resolution::Remote));
        assert!(resolved.resolved_at.is_some());
        assert!(engine.get(item.id).await.is_none());
    }

    #[tokio::test]
    async fn resolving_twice_matches_resolving_once() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        harness.remote.script(
            "E",
            [RemoteOutcome::Conflict {
                remote: json!({"id": "e1", "v": 2}),
            }],
        );
        engine
            .enqueue(NewSyncItem::new(
                MutationType::Update,
                "E",
                json!({"id": "e1", "v": 1}),
                Priority::Medium,
            ))
            .await
            .unwrap();
        engine.start_sync().await;
        let id = engine.conflicts().await[0].id;

        let first = engine.resolve(id, Resolution::Local).await.unwrap();
        let queue_after_first = engine.list().await;
        let requests_after_first = harness.remote.requests().len();

        let second = engine.resolve(id, Resolution::Local).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.list().await, queue_after_first);
        assert_eq!(harness.remote.requests().len(), requests_after_first);
        assert_eq!(engine.conflicts().await, vec![first]);
    }

    #[tokio::test]
    async fn automatic_strategy_resolves_during_session() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        engine
            .update_preferences(PreferencesPatch {
                conflict_strategy: Some(ConflictStrategy::Local),
                ..PreferencesPatch::default()
            })
            .await
            .unwrap();
        harness.remote.script(
            "E",
            [RemoteOutcome::Conflict {
                remote: json!({"id": "e1", "v": 2}),
            }],
        );
        engine
            .enqueue(NewSyncItem::new(
                MutationType::Update,
                "E",
                json!({"id": "e1", "v": 1}),
                Priority::Medium,
            ))
            .await
            .unwrap();

        let SyncOutcome::Completed(stats) = engine.start_sync().await else {
            panic!("session did not run");
        };
        assert_eq!(stats.conflicts_pending, 0);
        assert!(engine.list().await.is_empty());

        let requests = harness.remote.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].force);
        assert!(requests[1].force);
    }

    #[tokio::test]
    async fn merge_strategy_without_function_waits_for_prompt() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        engine
            .update_preferences(PreferencesPatch {
                conflict_strategy: Some(ConflictStrategy::Merge),
                ..PreferencesPatch::default()
            })
            .await
            .unwrap();
        harness.remote.script(
            "E",
            [RemoteOutcome::Conflict {
                remote: json!({"id": "e1"}),
            }],
        );
        engine
            .enqueue(NewSyncItem::new(
                MutationType::Update,
                "E",
                json!({"id": "e1", "v": 1}),
                Priority::Medium,
            ))
            .await
            .unwrap();

        engine.start_sync().await;
        assert!(!engine.conflicts().await[0].is_resolved());

        engine.register_merge("E", Arc::new(|_: &Value, remote: &Value| remote.clone()));
        engine.start_sync().await;
        assert!(engine.conflicts().await[0].is_resolved());
        assert!(engine.list().await.is_empty());
    }

    #[tokio::test]
    async fn cellular_gate_never_contacts_remote() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        engine
            .update_preferences(PreferencesPatch {
                sync_on_cellular: Some(false),
                ..PreferencesPatch::default()
            })
            .await
            .unwrap();
        harness
            .network
            .set_state(NetworkState::online(ConnectionKind::Cellular));
        let item = engine.enqueue(mutation("animals", Priority::High)).await.unwrap();

        let outcome = engine.start_sync().await;
        assert!(matches!(outcome, SyncOutcome::Rejected(reason) if reason.contains("cellular")));
        assert!(harness.remote.requests().is_empty());
        assert_eq!(engine.get(item.id).await.unwrap().status, SyncStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn bandwidth_limit_pauses_session() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        engine
            .update_preferences(PreferencesPatch {
                bandwidth_limit: Some(Some(1_000)),
                ..PreferencesPatch::default()
            })
            .await
            .unwrap();
        let payload = "x".repeat(1_000);
        for index in 0..5 {
            engine
                .enqueue(NewSyncItem::new(
                    MutationType::Create,
                    "observations",
                    json!({"seq": index, "body": payload}),
                    Priority::Medium,
                ))
                .await
                .unwrap();
        }

        let SyncOutcome::Completed(stats) = engine.start_sync().await else {
            panic!("session did not run");
        };
        assert_eq!(harness.remote.requests().len(), 5);
        assert!(stats.bandwidth_used > 5_000);
        assert!(stats.sync_duration >= 1_000);
        assert_eq!(stats.total_synced, 5);
    }

    #[tokio::test]
    async fn without_bandwidth_limit_session_does_not_pause() {
        let harness = Harness::new().await;
        let engine = &harness.engine;
        for index in 0..5 {
            engine
                .enqueue(NewSyncItem::new(
                    MutationType::Create,
                    "observations",
                    json!({"seq": index, "body": "x".repeat(1_000)}),
                    Priority::Medium,
                ))
                .await
                .unwrap();
        }
        let SyncOutcome::Completed(stats) = engine.start_sync().await else {
            panic!("session did not run");
        };
        assert!(stats.sync_duration < 1_000);
    }

    #[tokio::test]
    async fn reconnect_triggers_exactly_one_session() {
        let harness = Harness::builder().auto_sync().build().await;
        let engine = &harness.engine;
        harness.network.set_state(NetworkState::offline());
        engine.enqueue(mutation("animals", Priority::High)).await.unwrap();
        assert_eq!(engine.settle().await.len(), 1);

        engine.start_background();
        tokio::task::yield_now().await;
        let mut rx = engine.subscribe();

        harness
            .network
            .set_state(NetworkState::online(ConnectionKind::Wifi));

        let started = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match rx.recv().await {
                    Ok(SyncEvent::SessionCompleted(stats)) => return stats,
                    Ok(_) => {}
                    Err(error) => panic!("event stream closed: {error}"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(started.total_synced, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let sessions = drain(&mut rx)
            .into_iter()
            .filter(|event| *event == SyncEvent::SessionStarted)
            .count();
        assert_eq!(sessions, 0);
        assert_eq!(harness.remote.requests().len(), 1);
        engine.shutdown();
    }

    #[tokio::test]
    async fn enqueue_with_auto_sync_requests_session() {
        let harness = Harness::builder().auto_sync().build().await;
        let engine = &harness.engine;
        engine.enqueue(mutation("animals", Priority::High)).await.unwrap();

        let outcomes = engine.settle().await;
        assert!(matches!(outcomes.as_slice(), [SyncOutcome::Completed(_)]));
        assert!(engine.list().await.is_empty());
    }

    #[tokio::test]
    async fn queue_survives_restart() {
        let harness = Harness::new().await;
        harness.remote.script("D", [failure()]);
        let item = harness
            .engine
            .enqueue(mutation("D", Priority::Low))
            .await
            .unwrap();
        harness.engine.start_sync().await;

        let reopened = harness.reopen().await;
        let restored = reopened.engine.get(item.id).await.unwrap();
        assert_eq!(restored.retry_count, 1);
        assert_eq!(restored.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(reopened.engine.stats().await, harness.engine.stats().await);
    }

    #[tokio::test]
    async fn dropping_engine_releases_background_work() {
        let Harness { engine, remote, .. } = Harness::builder()
            .auto_sync()
            .remote_delay(Duration::from_secs(30))
            .build()
            .await;
        engine.start_background();
        engine.enqueue(mutation("animals", Priority::High)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !engine.is_syncing() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        drop(engine);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(Arc::strong_count(&remote), 1);
    }

    #[tokio::test]
    async fn preference_subscribers_see_updates() {
        let harness = Harness::new().await;
        let mut rx = harness.engine.subscribe_preferences();

        harness
            .engine
            .update_preferences(PreferencesPatch {
                max_retries: Some(5),
                ..PreferencesPatch::default()
            })
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().max_retries, 5);
        assert_eq!(harness.engine.preferences().max_retries, 5);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let result = SyncEngine::open(
            Arc::new(crate::storage::MemoryStore::new()),
            Arc::new(crate::network::ManualNetworkMonitor::new(
                NetworkState::offline(),
            )),
            Arc::new(crate::sync::test_support::ScriptedRemote::default()),
            EngineConfig {
                item_timeout_ms: 0,
                ..EngineConfig::default()
            },
        )
        .await;
        assert!(result.is_err());
    }
}
