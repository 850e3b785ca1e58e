//! Operator-configurable sync policy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::Priority;
use crate::error::{Error, Result};

/// How the automatic sweep treats unresolved conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Local version wins
    Local,
    /// Remote version wins
    Remote,
    /// Leave conflicts for the user
    #[default]
    Prompt,
    /// Use a registered per-entity merge function, prompt otherwise
    Merge,
}

impl ConflictStrategy {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Prompt => "prompt",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "prompt" => Ok(Self::Prompt),
            "merge" => Ok(Self::Merge),
            other => Err(Error::InvalidInput(format!(
                "unknown conflict strategy '{other}'"
            ))),
        }
    }
}

/// Sync policy persisted alongside the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPreferences {
    /// Sync on a timer, on reconnect, and after each enqueue
    pub auto_sync: bool,
    /// Timer period in minutes
    pub sync_interval: u32,
    pub sync_on_cellular: bool,
    /// Attempts before an item becomes a terminal failure
    pub max_retries: u32,
    pub conflict_strategy: ConflictStrategy,
    /// Processing order of priority levels, first is drained first
    pub priority_order: Vec<Priority>,
    /// Average outbound bytes per second allowed in a session
    pub bandwidth_limit: Option<u64>,
}

impl Default for SyncPreferences {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_interval: 15,
            sync_on_cellular: true,
            max_retries: 3,
            conflict_strategy: ConflictStrategy::Prompt,
            priority_order: Priority::ALL.to_vec(),
            bandwidth_limit: None,
        }
    }
}

impl SyncPreferences {
    /// Timer period as a `Duration`
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.sync_interval.max(1)) * 60)
    }

    /// Auto-sync timer period, or `None` while auto-sync is off
    pub fn auto_sync_period(&self) -> Option<Duration> {
        self.auto_sync.then(|| self.interval())
    }

    /// Position of `priority` in the configured order; unknown levels sort last
    pub fn priority_rank(&self, priority: Priority) -> usize {
        self.priority_order
            .iter()
            .position(|candidate| *candidate == priority)
            .unwrap_or(self.priority_order.len())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_interval == 0 {
            return Err(Error::InvalidInput(
                "sync interval must be at least one minute".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidInput(
                "max retries must be at least 1".to_string(),
            ));
        }
        if self.bandwidth_limit == Some(0) {
            return Err(Error::InvalidInput(
                "bandwidth limit must be positive; unset it to disable throttling".to_string(),
            ));
        }
        let is_permutation = self.priority_order.len() == Priority::ALL.len()
            && Priority::ALL
                .iter()
                .all(|level| self.priority_order.contains(level));
        if !is_permutation {
            return Err(Error::InvalidInput(
                "priority order must list high, medium, and low exactly once".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply a partial update, returning the validated result
    pub fn patched(&self, patch: PreferencesPatch) -> Result<Self> {
        let mut next = self.clone();
        if let Some(auto_sync) = patch.auto_sync {
            next.auto_sync = auto_sync;
        }
        if let Some(sync_interval) = patch.sync_interval {
            next.sync_interval = sync_interval;
        }
        if let Some(sync_on_cellular) = patch.sync_on_cellular {
            next.sync_on_cellular = sync_on_cellular;
        }
        if let Some(max_retries) = patch.max_retries {
            next.max_retries = max_retries;
        }
        if let Some(conflict_strategy) = patch.conflict_strategy {
            next.conflict_strategy = conflict_strategy;
        }
        if let Some(priority_order) = patch.priority_order {
            next.priority_order = priority_order;
        }
        if let Some(bandwidth_limit) = patch.bandwidth_limit {
            next.bandwidth_limit = bandwidth_limit;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial preferences update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreferencesPatch {
    pub auto_sync: Option<bool>,
    pub sync_interval: Option<u32>,
    pub sync_on_cellular: Option<bool>,
    pub max_retries: Option<u32>,
    pub conflict_strategy: Option<ConflictStrategy>,
    pub priority_order: Option<Vec<Priority>>,
    /// `Some(None)` clears the limit
    pub bandwidth_limit: Option<Option<u64>>,
}

impl PreferencesPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.auto_sync.is_none()
            && self.sync_interval.is_none()
            && self.sync_on_cellular.is_none()
            && self.max_retries.is_none()
            && self.conflict_strategy.is_none()
            && self.priority_order.is_none()
            && self.bandwidth_limit.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_default() {
        let prefs = SyncPreferences::default();
        assert!(prefs.auto_sync);
        assert_eq!(prefs.max_retries, 3);
        assert_eq!(prefs.conflict_strategy, ConflictStrategy::Prompt);
        assert_eq!(
            prefs.priority_order,
            vec![Priority::High, Priority::Medium, Priority::Low]
        );
        assert!(prefs.validate().is_ok());
    }

    #[test]
    fn test_priority_rank_follows_order() {
        let prefs = SyncPreferences {
            priority_order: vec![Priority::Low, Priority::High, Priority::Medium],
            ..SyncPreferences::default()
        };
        assert_eq!(prefs.priority_rank(Priority::Low), 0);
        assert_eq!(prefs.priority_rank(Priority::High), 1);
        assert_eq!(prefs.priority_rank(Priority::Medium), 2);
    }

    #[test]
    fn test_patch_applies_only_given_fields() {
        let prefs = SyncPreferences::default();
        let patched = prefs
            .patched(PreferencesPatch {
                sync_on_cellular: Some(false),
                bandwidth_limit: Some(Some(2_048)),
                ..PreferencesPatch::default()
            })
            .unwrap();
        assert!(!patched.sync_on_cellular);
        assert_eq!(patched.bandwidth_limit, Some(2_048));
        assert_eq!(patched.sync_interval, prefs.sync_interval);

        let cleared = patched
            .patched(PreferencesPatch {
                bandwidth_limit: Some(None),
                ..PreferencesPatch::default()
            })
            .unwrap();
        assert_eq!(cleared.bandwidth_limit, None);
    }

    #[test]
    fn test_patch_rejects_invalid_values() {
        let prefs = SyncPreferences::default();
        assert!(prefs
            .patched(PreferencesPatch {
                sync_interval: Some(0),
                ..PreferencesPatch::default()
            })
            .is_err());
        assert!(prefs
            .patched(PreferencesPatch {
                priority_order: Some(vec![Priority::High, Priority::High, Priority::Low]),
                ..PreferencesPatch::default()
            })
            .is_err());
        assert!(prefs
            .patched(PreferencesPatch {
                max_retries: Some(0),
                ..PreferencesPatch::default()
            })
            .is_err());
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let prefs: SyncPreferences =
            serde_json::from_str(r#"{"auto_sync": false, "conflict_strategy": "remote"}"#)
                .unwrap();
        assert!(!prefs.auto_sync);
        assert_eq!(prefs.conflict_strategy, ConflictStrategy::Remote);
        assert_eq!(prefs.max_retries, 3);
    }
}
