//! Configuration storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{Participant, ParticipantId, Role};

const DEFAULT_API_BASE: &str = "http://localhost:8080/api";
const DEFAULT_SOCKET_URL: &str = "ws://localhost:8080/ws";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// REST base URL (request/response fallback)
    #[serde(default = "default_api_base")]
    pub api_base_url: String,
    /// Duplex channel URL
    #[serde(default = "default_socket_url")]
    pub socket_url: String,
    /// Local participant identifier
    pub participant_id: Option<String>,
    /// Local participant role
    #[serde(default = "default_role")]
    pub role: Role,
    /// Opaque bearer token for the REST API
    pub api_token: Option<String>,
    /// Timing knobs for the sync engine
    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_socket_url() -> String {
    DEFAULT_SOCKET_URL.to_string()
}

fn default_role() -> Role {
    Role::Candidate
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Delay before the batch mark-as-read write after opening a conversation
    pub mark_read_debounce_ms: u64,
    /// Interval between heartbeat frames on the duplex channel
    pub heartbeat_secs: u64,
    /// Upper bound for reconnect backoff
    pub max_backoff_secs: u64,
    /// A session that lived this long resets the backoff
    pub stability_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            mark_read_debounce_ms: 3000,
            heartbeat_secs: 25,
            max_backoff_secs: 64,
            stability_secs: 60,
        }
    }
}

impl SyncSettings {
    pub fn mark_read_debounce(&self) -> Duration {
        Duration::from_millis(self.mark_read_debounce_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base(),
            socket_url: default_socket_url(),
            participant_id: None,
            role: default_role(),
            api_token: None,
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "recruit-chat", "recruit-chat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains the API token)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// The local participant this session acts as.
    pub fn identity(&self) -> Result<Participant> {
        let id = self
            .participant_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .context("No participant id configured. Run `recruit-chat configure --participant <id>` first.")?;
        Ok(Participant {
            id: ParticipantId::new(id),
            role: self.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE);
        assert_eq!(config.sync.mark_read_debounce(), Duration::from_secs(3));
        assert_eq!(config.sync.max_backoff_secs, 64);
        assert!(config.identity().is_err());
    }

    #[test]
    fn test_partial_sync_table() {
        let config = Config::from_toml(
            r#"
            participant_id = "rec-1"
            role = "recruiter"

            [sync]
            heartbeat_secs = 10
            "#,
        )
        .unwrap();
        let me = config.identity().unwrap();
        assert_eq!(me.id.as_str(), "rec-1");
        assert_eq!(me.role, Role::Recruiter);
        assert_eq!(config.sync.heartbeat_secs, 10);
        assert_eq!(config.sync.mark_read_debounce_ms, 3000);
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = Config::default();
        config.participant_id = Some("cand-7".to_string());
        let text = toml::to_string_pretty(&config).unwrap();
        let back = Config::from_toml(&text).unwrap();
        assert_eq!(back.participant_id.as_deref(), Some("cand-7"));
    }
}
