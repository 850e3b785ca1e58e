use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fieldsync_core::network::{ManualNetworkMonitor, NetworkState};
use fieldsync_core::remote::{HttpRemoteEndpoint, RemoteEndpoint, RemoteOutcome, RemoteRequest};
use fieldsync_core::storage::LibSqlStore;
use fieldsync_core::util::normalize_text_option;
use fieldsync_core::{
    EngineConfig, SyncConflict, SyncEngine, SyncEvent, SyncItem, SyncPreferences, SyncStats,
};
use serde::Serialize;
use serde_json::Value;

use crate::cli::Cli;
use crate::error::CliError;

const ENV_DB_PATH: &str = "FIELDSYNC_DB_PATH";
const ENV_API_URL: &str = "FIELDSYNC_API_URL";
const ENV_API_TOKEN: &str = "FIELDSYNC_API_TOKEN";

#[derive(Debug, Serialize)]
pub struct SyncItemListItem {
    pub id: String,
    #[serde(rename = "type")]
    pub mutation: String,
    pub entity: String,
    pub record_id: Option<String>,
    pub priority: String,
    pub status: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub timestamp: i64,
    pub relative_time: String,
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: String,
    pub item_id: String,
    pub entity: String,
    #[serde(rename = "type")]
    pub mutation: String,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub resolution: Option<String>,
    pub resolved_at: Option<i64>,
    pub local_version: Value,
    pub remote_version: Value,
}

/// Where and how to open the engine for one CLI invocation
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub db_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub network: NetworkState,
    pub remote: Option<RemoteSettings>,
}

#[derive(Clone)]
pub struct RemoteSettings {
    pub url: String,
    pub token: Option<String>,
}

impl std::fmt::Debug for RemoteSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteSettings")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl EngineOptions {
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        Ok(Self {
            db_path: resolve_db_path(cli.db_path.clone())?,
            config_path: cli.config.clone().or_else(default_config_path),
            network: cli.network.into(),
            remote: remote_settings_from_env(),
        })
    }
}

#[derive(Clone, Copy)]
pub enum OpenEngineMode {
    Standard,
    RequireRemote,
}

impl OpenEngineMode {
    const fn requires_remote(self) -> bool {
        matches!(self, Self::RequireRemote)
    }
}

/// Stand-in endpoint when no remote is configured; the engine is also told
/// it is offline so no session ever reaches it.
struct UnconfiguredRemote;

#[async_trait]
impl RemoteEndpoint for UnconfiguredRemote {
    async fn send(&self, _request: &RemoteRequest) -> RemoteOutcome {
        RemoteOutcome::Failed {
            message: "remote endpoint is not configured".to_string(),
        }
    }
}

pub async fn open_engine(
    options: &EngineOptions,
    mode: OpenEngineMode,
) -> Result<SyncEngine, CliError> {
    let config = load_engine_config(options.config_path.as_deref())?;
    let store = Arc::new(LibSqlStore::open_path(options.db_path.clone()).await?);

    let (remote, network) = if let Some(settings) = &options.remote {
        let endpoint: Arc<dyn RemoteEndpoint> = Arc::new(HttpRemoteEndpoint::new(
            settings.url.clone(),
            settings.token.clone(),
            config.item_timeout(),
        )?);
        (endpoint, options.network)
    } else if mode.requires_remote() {
        return Err(CliError::RemoteNotConfigured);
    } else {
        tracing::debug!("No remote endpoint configured; running offline");
        let endpoint: Arc<dyn RemoteEndpoint> = Arc::new(UnconfiguredRemote);
        (endpoint, NetworkState::offline())
    };

    let monitor = Arc::new(ManualNetworkMonitor::new(network));
    Ok(SyncEngine::open(store, monitor, remote, config).await?)
}

pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    let config = match path {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

pub fn remote_settings_from_env() -> Option<RemoteSettings> {
    let url = normalize_text_option(env::var(ENV_API_URL).ok())?;
    Some(RemoteSettings {
        url,
        token: normalize_text_option(env::var(ENV_API_TOKEN).ok()),
    })
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("fieldsync").join("fieldsync.db"))
        .ok_or_else(|| CliError::Config("failed to resolve data directory".to_string()))
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fieldsync").join("engine.json"))
}

/// Parse the payload of a mutation; only JSON objects are accepted.
pub fn parse_mutation_data(raw: &str) -> Result<Value, CliError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|error| CliError::InvalidData(error.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CliError::InvalidData(format!(
            "expected an object, got `{}`",
            preview_text(&value.to_string(), 40)
        )))
    }
}

/// Pick the candidate whose id equals `query`, or the only one it prefixes.
pub fn select_by_prefix<T: Clone>(
    query: &str,
    candidates: &[T],
    id_of: impl Fn(&T) -> String,
) -> Result<T, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::EmptyId);
    }

    if let Some(exact) = candidates.iter().find(|candidate| id_of(candidate) == query) {
        return Ok(exact.clone());
    }

    let matching = candidates
        .iter()
        .filter(|candidate| id_of(candidate).starts_with(query))
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::NotFound(query.to_string())),
        [only] => Ok((*only).clone()),
        many => {
            let options = many
                .iter()
                .take(3)
                .map(|candidate| short_id(&id_of(candidate)))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub async fn resolve_item(engine: &SyncEngine, query: &str) -> Result<SyncItem, CliError> {
    select_by_prefix(query, &engine.list().await, |item| item.id.to_string())
}

pub async fn resolve_conflict(engine: &SyncEngine, query: &str) -> Result<SyncConflict, CliError> {
    select_by_prefix(query, &engine.conflicts().await, |conflict| {
        conflict.id.to_string()
    })
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn preview_text(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let truncated = flattened
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    format!("{truncated}...")
}

pub fn item_to_list_item(item: &SyncItem) -> SyncItemListItem {
    let now_ms = Utc::now().timestamp_millis();
    SyncItemListItem {
        id: item.id.to_string(),
        mutation: item.mutation.label().to_string(),
        entity: item.entity.clone(),
        record_id: item.record_id(),
        priority: item.priority.label().to_string(),
        status: item.status.label().to_string(),
        retry_count: item.retry_count,
        last_error: item.last_error.clone(),
        timestamp: item.timestamp,
        relative_time: format_relative_time(item.timestamp, now_ms),
        data: item.data.clone(),
    }
}

pub fn format_item_lines(items: &[SyncItem]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    items
        .iter()
        .map(|item| {
            let target = item.record_id().map_or_else(
                || item.entity.clone(),
                |record_id| format!("{}/{record_id}", item.entity),
            );
            let mut line = format!(
                "{}  {:<10} {:<6} {:<6} {}  retries={}  {}",
                short_id(&item.id.to_string()),
                item.status.label(),
                item.priority.label(),
                item.mutation.label(),
                target,
                item.retry_count,
                format_relative_time(item.timestamp, now_ms)
            );
            if let Some(error) = &item.last_error {
                line.push_str(&format!("  error={}", preview_text(error, 60)));
            }
            line
        })
        .collect()
}

pub fn conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id.to_string(),
        item_id: conflict.item_id.to_string(),
        entity: conflict.entity.clone(),
        mutation: conflict.mutation.label().to_string(),
        detected_at: conflict.detected_at,
        detected_at_iso: format_sync_timestamp(conflict.detected_at),
        resolution: conflict
            .resolution
            .map(|resolution| resolution.label().to_string()),
        resolved_at: conflict.resolved_at,
        local_version: conflict.local_version.clone(),
        remote_version: conflict.remote_version.clone(),
    }
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  {:<6} {}  local={} remote={}",
                short_id(&conflict.id.to_string()),
                format_sync_timestamp(conflict.detected_at),
                conflict.resolution.map_or("open", |resolution| resolution.label()),
                conflict.entity,
                preview_text(&conflict.local_version.to_string(), 40),
                preview_text(&conflict.remote_version.to_string(), 40)
            )
        })
        .collect()
}

pub fn format_stats_lines(stats: &SyncStats) -> Vec<String> {
    let last_sync = stats
        .last_sync
        .map_or_else(|| "never".to_string(), format_sync_timestamp);
    vec![
        format!("last sync:         {last_sync}"),
        format!("pending changes:   {}", stats.pending_changes),
        format!("failed changes:    {}", stats.failed_changes),
        format!("open conflicts:    {}", stats.conflicts_pending),
        format!("total synced:      {}", stats.total_synced),
        format!("last bandwidth:    {} bytes", stats.bandwidth_used),
        format!("last duration:     {} ms", stats.sync_duration),
    ]
}

pub fn format_preferences_lines(preferences: &SyncPreferences) -> Vec<String> {
    let order = preferences
        .priority_order
        .iter()
        .map(|priority| priority.label())
        .collect::<Vec<_>>()
        .join(",");
    let bandwidth = preferences
        .bandwidth_limit
        .map_or_else(|| "unlimited".to_string(), |limit| format!("{limit} B/s"));
    vec![
        format!("auto sync:         {}", preferences.auto_sync),
        format!("interval:          {} min", preferences.sync_interval),
        format!("sync on cellular:  {}", preferences.sync_on_cellular),
        format!("max retries:       {}", preferences.max_retries),
        format!("conflict strategy: {}", preferences.conflict_strategy.label()),
        format!("priority order:    {order}"),
        format!("bandwidth limit:   {bandwidth}"),
    ]
}

/// One human-readable line per event for `watch`
pub fn format_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::SessionStarted => "session started".to_string(),
        SyncEvent::SessionCompleted(stats) => format!(
            "session completed: {} pending, {} failed, {} conflicts, {} bytes in {} ms",
            stats.pending_changes,
            stats.failed_changes,
            stats.conflicts_pending,
            stats.bandwidth_used,
            stats.sync_duration
        ),
        SyncEvent::SessionError(reason) => format!("session refused: {reason}"),
        SyncEvent::QueueUpdated(items) => format!("queue updated: {} items", items.len()),
        SyncEvent::ConflictDetected(conflict) => format!(
            "conflict {} detected on {}",
            short_id(&conflict.id.to_string()),
            conflict.entity
        ),
        SyncEvent::ConflictResolved(conflict) => format!(
            "conflict {} resolved ({})",
            short_id(&conflict.id.to_string()),
            conflict.resolution.map_or("unknown", |resolution| resolution.label())
        ),
        SyncEvent::ItemStarted(item) => format!(
            "sending {} {} {}",
            item.mutation.label(),
            item.entity,
            short_id(&item.id.to_string())
        ),
        SyncEvent::ItemCompleted(item) => format!("synced {}", short_id(&item.id.to_string())),
        SyncEvent::ItemFailed(item) => format!(
            "failed {} after {} attempts: {}",
            short_id(&item.id.to_string()),
            item.retry_count,
            item.last_error.as_deref().unwrap_or("unknown error")
        ),
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
