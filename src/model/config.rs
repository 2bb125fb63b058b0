use serde::{Deserialize, Serialize};

/// Configuration from daybook.toml
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub edit: EditConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Re-fetch the target views once a create settles
    #[serde(default = "default_true")]
    pub refetch_on_create: bool,
    /// Re-fetch the target views once an update or move settles
    #[serde(default)]
    pub refetch_on_update: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            refetch_on_create: true,
            refetch_on_update: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Shown once for every rolled-back mutation
    #[serde(default = "default_failure_message")]
    pub failure_message: String,
    /// Emit success notifications for mutations that carry one
    #[serde(default = "default_true")]
    pub success_messages: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            failure_message: default_failure_message(),
            success_messages: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditConfig {
    /// Editing a start time moves the end time to start + this many minutes
    #[serde(default = "default_duration")]
    pub default_duration_minutes: u32,
}

impl Default for EditConfig {
    fn default() -> Self {
        EditConfig {
            default_duration_minutes: default_duration(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Append rejected writes to `.recovery.log` in this directory
    #[serde(default)]
    pub dir: Option<std::path::PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_failure_message() -> String {
    "Could not save task, changes were reverted".to_string()
}

fn default_duration() -> u32 {
    60
}
