//! Reader overlay configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Default reconciliation period against the persistent backend.
pub const DEFAULT_SYNC_INTERVAL_MS: u32 = 1000;

/// Default minimum length of extracted text for a page to count as readable.
pub const DEFAULT_MIN_CONTENT_CHARS: usize = 100;

/// Default backend key for the activation record.
pub const DEFAULT_STATE_KEY: &str = "readerViewState";

/// Default backend key for the page snapshot.
pub const DEFAULT_SNAPSHOT_KEY: &str = "readerViewSnapshot";

/// Default DOM event name carrying reader commands.
pub const DEFAULT_COMMAND_EVENT: &str = "reader-view-command";

/// Runtime configuration, usually shipped as JSON by the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReaderConfig {
    /// Backend reconciliation period. `0` disables periodic sync.
    pub sync_interval_ms: u32,

    /// Minimum extracted text length accepted as readable content.
    pub min_content_chars: usize,

    /// Backend key for the activation record.
    pub state_key: String,

    /// Backend key for the page snapshot.
    pub snapshot_key: String,

    /// Mirror the live snapshot into the backend.
    pub persist_snapshot: bool,

    /// Close the reader view on Escape.
    pub close_on_escape: bool,

    /// DOM event name the command bridge listens for.
    pub command_event: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
            state_key: DEFAULT_STATE_KEY.to_string(),
            snapshot_key: DEFAULT_SNAPSHOT_KEY.to_string(),
            persist_snapshot: true,
            close_on_escape: true,
            command_event: DEFAULT_COMMAND_EVENT.to_string(),
        }
    }
}

impl ReaderConfig {
    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ReaderConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_key.trim().is_empty() {
            return Err(ConfigError::Invalid("stateKey must not be empty".into()));
        }
        if self.snapshot_key.trim().is_empty() {
            return Err(ConfigError::Invalid("snapshotKey must not be empty".into()));
        }
        if self.state_key == self.snapshot_key {
            return Err(ConfigError::Invalid(
                "stateKey and snapshotKey must differ".into(),
            ));
        }
        if self.command_event.trim().is_empty() {
            return Err(ConfigError::Invalid("commandEvent must not be empty".into()));
        }
        Ok(())
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync_interval_ms > 0
    }
}
