//! Session orchestration and auto-sync triggers.
//!
//! At most one session runs at a time. The session state lives in a `watch`
//! channel and the `idle -> running` transition is a single
//! `send_if_modified`, so two callers racing `start_sync` cannot both win.

use std::future::pending;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::{BandwidthThrottle, ConflictResolver, PreferencesStore, SessionReport, StatsTracker, SyncQueue};
use crate::config::EngineConfig;
use crate::events::{EventBus, SyncEvent};
use crate::models::{SyncStats, SyncStatus};
use crate::network::NetworkMonitor;
use crate::remote::{RemoteEndpoint, RemoteOutcome, RemoteRequest};
use crate::util::unix_millis_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// What a call to `start_sync` amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncStats),
    /// Another session was already running; nothing was done
    AlreadyRunning,
    /// Refused by policy before any item was touched
    Rejected(String),
}

pub struct SyncScheduler {
    queue: Arc<SyncQueue>,
    resolver: Arc<ConflictResolver>,
    stats: Arc<StatsTracker>,
    preferences: Arc<PreferencesStore>,
    network: Arc<dyn NetworkMonitor>,
    remote: Arc<dyn RemoteEndpoint>,
    events: EventBus,
    config: EngineConfig,
    state: watch::Sender<SessionState>,
    shutdown: watch::Sender<bool>,
    tasks: StdMutex<JoinSet<SyncOutcome>>,
}

/// Returns the scheduler to idle however the session ends
struct SessionGuard<'a> {
    state: &'a watch::Sender<SessionState>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.state.send_replace(SessionState::Idle);
    }
}

impl SyncScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<SyncQueue>,
        resolver: Arc<ConflictResolver>,
        stats: Arc<StatsTracker>,
        preferences: Arc<PreferencesStore>,
        network: Arc<dyn NetworkMonitor>,
        remote: Arc<dyn RemoteEndpoint>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            resolver,
            stats,
            preferences,
            network,
            remote,
            events,
            config,
            state,
            shutdown,
            tasks: StdMutex::new(JoinSet::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.state.borrow() == SessionState::Running
    }

    /// Run one session now, unless one is running or policy forbids it.
    pub async fn start_sync(&self) -> SyncOutcome {
        if self.is_running() {
            tracing::debug!("Sync session already running");
            return SyncOutcome::AlreadyRunning;
        }
        if let Some(reason) = self.policy_rejection() {
            tracing::info!("Sync session rejected: {reason}");
            self.events.publish(SyncEvent::SessionError(reason.clone()));
            return SyncOutcome::Rejected(reason);
        }
        if !self.try_begin() {
            return SyncOutcome::AlreadyRunning;
        }

        let guard = SessionGuard { state: &self.state };
        self.events.publish(SyncEvent::SessionStarted);
        let stats = self.run_session().await;
        drop(guard);

        self.events
            .publish(SyncEvent::SessionCompleted(stats.clone()));
        SyncOutcome::Completed(stats)
    }

    /// Start a session in the background; a no-op if one is already running.
    pub fn request_sync(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move { this.start_sync().await });
    }

    /// Wait for every session spawned by `request_sync`, including ones
    /// requested while waiting.
    pub async fn settle(&self) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let mut tasks = std::mem::take(
                &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if tasks.is_empty() {
                return outcomes;
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(error) => tracing::warn!("Sync session task failed: {error}"),
                }
            }
        }
    }

    /// Stop the background loop and make the running session stop after
    /// its current item. Later `start_sync` calls are rejected.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!("Sync scheduler shutting down");
        }
    }

    /// Abort sessions spawned by `request_sync` that are still running.
    pub fn abort_sessions(&self) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn policy_rejection(&self) -> Option<String> {
        if self.is_shutting_down() {
            return Some("sync engine is shutting down".to_string());
        }
        let network = self.network.current_state();
        if !network.connected {
            return Some("no network connection".to_string());
        }
        if network.is_cellular() && !self.preferences.get().sync_on_cellular {
            return Some("sync over cellular is disabled".to_string());
        }
        None
    }

    fn try_begin(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Running {
                false
            } else {
                *state = SessionState::Running;
                true
            }
        })
    }

    async fn run_session(&self) -> SyncStats {
        let started = Instant::now();
        let preferences = self.preferences.get();
        let mut throttle =
            BandwidthThrottle::new(preferences.bandwidth_limit, self.config.throttle_pause());
        let items = self.queue.dequeue_sorted().await;
        tracing::info!(items = items.len(), "Sync session started");

        let mut synced = 0u64;
        for queued in &items {
            if self.is_shutting_down() {
                tracing::info!("Sync session interrupted by shutdown");
                break;
            }
            throttle.pause_if_needed().await;

            let Some(item) = self.queue.mark_syncing(queued.id).await else {
                continue;
            };
            self.events.publish(SyncEvent::ItemStarted(item.clone()));

            let request = RemoteRequest::for_item(&item);
            throttle.record(request.estimated_size());
            let outcome = tokio::time::timeout(self.config.item_timeout(), self.remote.send(&request))
                .await
                .unwrap_or_else(|_| RemoteOutcome::Failed {
                    message: format!("timed out after {} ms", self.config.item_timeout_ms),
                });

            match outcome {
                RemoteOutcome::Accepted => {
                    if let Some(mut done) = self.queue.remove(item.id).await {
                        done.status = SyncStatus::Completed;
                        synced += 1;
                        tracing::debug!(id = %done.id, entity = %done.entity, "Mutation synced");
                        self.events.publish(SyncEvent::ItemCompleted(done));
                    }
                }
                RemoteOutcome::Conflict { remote } => {
                    self.resolver.record(&item, remote).await;
                }
                RemoteOutcome::Failed { message } => {
                    self.queue.mark_failed(item.id, &message).await;
                }
            }
        }

        let strategy = self.preferences.get().conflict_strategy;
        let auto_resolved = self.resolver.sweep(strategy).await;

        let report = SessionReport {
            synced,
            bytes: throttle.bytes_transferred(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            finished_at: unix_millis_now(),
        };
        let stats = self
            .stats
            .record_session(
                report,
                &self.queue.list().await,
                self.resolver.unresolved_count().await,
            )
            .await;
        tracing::info!(
            synced,
            auto_resolved,
            pending = stats.pending_changes,
            failed = stats.failed_changes,
            conflicts = stats.conflicts_pending,
            bytes = stats.bandwidth_used,
            duration_ms = stats.sync_duration,
            "Sync session completed"
        );
        stats
    }

    /// Drive auto-sync until `shutdown`: the interval timer, rescheduling on
    /// preference changes, and one session per reconnect.
    pub fn spawn_background(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_background().await })
    }

    async fn run_background(self: Arc<Self>) {
        let mut preferences = self.preferences.subscribe();
        let mut network = self.network.subscribe();
        let mut shutdown = self.shutdown.subscribe();

        let mut period = preferences.borrow_and_update().auto_sync_period();
        let mut timer = auto_sync_timer(period);
        let mut was_connected = network.borrow_and_update().connected;
        let mut preferences_open = true;
        let mut network_open = true;

        while !*shutdown.borrow_and_update() {
            tokio::select! {
                () = next_tick(&mut timer) => {
                    tracing::debug!("Auto-sync timer fired");
                    self.request_sync();
                }
                changed = preferences.changed(), if preferences_open => {
                    if changed.is_err() {
                        preferences_open = false;
                        continue;
                    }
                    // Only schedule changes restart the countdown
                    let next = preferences.borrow_and_update().auto_sync_period();
                    if next != period {
                        period = next;
                        timer = auto_sync_timer(period);
                        tracing::debug!(enabled = timer.is_some(), "Auto-sync timer rescheduled");
                    }
                }
                changed = network.changed(), if network_open => {
                    if changed.is_err() {
                        network_open = false;
                        continue;
                    }
                    let connected = network.borrow_and_update().connected;
                    if connected && !was_connected && self.preferences.get().auto_sync {
                        tracing::info!("Network reconnected; starting sync");
                        self.request_sync();
                    }
                    was_connected = connected;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Auto-sync loop stopped");
    }
}

fn auto_sync_timer(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    })
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictStrategy, MutationType, NewSyncItem, PreferencesPatch, Priority};
    use crate::network::{ConnectionKind, NetworkState};
    use crate::sync::test_support::Harness;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn create(entity: &str) -> NewSyncItem {
        NewSyncItem::new(MutationType::Create, entity, json!({"n": 1}), Priority::Medium)
    }

    #[tokio::test]
    async fn offline_session_is_rejected_once() {
        let harness = Harness::new().await;
        harness.engine.enqueue(create("animals")).await.unwrap();
        harness.network.set_state(NetworkState::offline());
        let mut rx = harness.engine.subscribe();

        let outcome = harness.engine.start_sync().await;
        assert!(matches!(outcome, SyncOutcome::Rejected(_)));
        assert!(matches!(rx.try_recv().unwrap(), SyncEvent::SessionError(_)));
        assert!(rx.try_recv().is_err());
        assert!(harness.remote.requests().is_empty());
        assert_eq!(harness.engine.list().await[0].status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn session_guard_returns_to_idle() {
        let harness = Harness::new().await;
        harness.engine.enqueue(create("animals")).await.unwrap();

        let outcome = harness.engine.start_sync().await;
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
        assert!(!harness.scheduler().is_running());
        assert!(harness.engine.list().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_remote_times_out_as_failure() {
        let harness = Harness::builder()
            .remote_delay(Duration::from_secs(30))
            .build()
            .await;
        let item = harness.engine.enqueue(create("animals")).await.unwrap();

        harness.engine.start_sync().await;
        let failed = harness.engine.get(item.id).await.unwrap();
        assert_eq!(failed.retry_count, 1);
        assert!(failed.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_sessions() {
        let harness = Harness::new().await;
        harness.engine.shutdown();
        assert_eq!(
            harness.engine.start_sync().await,
            SyncOutcome::Rejected("sync engine is shutting down".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interval_timer_starts_sessions() {
        let harness = Harness::new().await;
        harness
            .engine
            .update_preferences(PreferencesPatch {
                auto_sync: Some(true),
                sync_interval: Some(1),
                ..PreferencesPatch::default()
            })
            .await
            .unwrap();
        harness.engine.start_background();
        tokio::task::yield_now().await;
        let mut rx = harness.engine.subscribe();

        tokio::time::sleep(Duration::from_secs(61)).await;
        let started = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(SyncEvent::SessionStarted) = rx.recv().await {
                    break;
                }
            }
        })
        .await;
        assert!(started.is_ok());
        harness.engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_preference_changes_keep_timer_running() {
        let harness = Harness::new().await;
        harness
            .engine
            .update_preferences(PreferencesPatch {
                auto_sync: Some(true),
                sync_interval: Some(1),
                ..PreferencesPatch::default()
            })
            .await
            .unwrap();
        harness.engine.start_background();
        tokio::task::yield_now().await;
        let mut rx = harness.engine.subscribe();

        tokio::time::sleep(Duration::from_secs(50)).await;
        harness
            .engine
            .update_preferences(PreferencesPatch {
                bandwidth_limit: Some(Some(1_000_000)),
                conflict_strategy: Some(ConflictStrategy::Remote),
                ..PreferencesPatch::default()
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        let started = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(SyncEvent::SessionStarted) = rx.recv().await {
                    break;
                }
            }
        })
        .await;
        assert!(started.is_ok());
        harness.engine.shutdown();
    }

    #[tokio::test]
    async fn cellular_allowed_by_default() {
        let harness = Harness::new().await;
        harness
            .network
            .set_state(NetworkState::online(ConnectionKind::Cellular));
        assert!(matches!(
            harness.engine.start_sync().await,
            SyncOutcome::Completed(_)
        ));
    }
}
