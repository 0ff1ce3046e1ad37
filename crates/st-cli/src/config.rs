//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use st_core::ActivityConfig;

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base address of the monitor server.
    pub server_url: String,

    /// Request timeout in seconds. Unset means no timeout beyond the
    /// transport defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// How often elapsed time is flushed into the focused domain.
    pub save_interval_secs: u64,

    /// How often accumulated time is submitted.
    pub submit_interval_secs: u64,

    /// How often the logged-in user is re-checked.
    pub user_check_interval_secs: u64,

    /// How often a status line is logged.
    pub status_interval_secs: u64,

    /// Delay before the first liveness and identity probes.
    pub startup_probe_delay_secs: u64,

    /// Idle time after which a page reports the user inactive.
    pub idle_threshold_secs: u64,

    /// How often pages run the idle check.
    pub idle_check_interval_secs: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("save_interval_secs", &self.save_interval_secs)
            .field("submit_interval_secs", &self.submit_interval_secs)
            .field("user_check_interval_secs", &self.user_check_interval_secs)
            .field("status_interval_secs", &self.status_interval_secs)
            .field("startup_probe_delay_secs", &self.startup_probe_delay_secs)
            .field("idle_threshold_secs", &self.idle_threshold_secs)
            .field("idle_check_interval_secs", &self.idle_check_interval_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: st_client::DEFAULT_SERVER_URL.to_string(),
            request_timeout_secs: None,
            save_interval_secs: 5,
            submit_interval_secs: 30,
            user_check_interval_secs: 60,
            status_interval_secs: 60,
            startup_probe_delay_secs: 2,
            idle_threshold_secs: 30,
            idle_check_interval_secs: 10,
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (ST_*)
        figment = figment.merge(Env::prefixed("ST_"));

        figment.extract()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn activity(&self) -> ActivityConfig {
        ActivityConfig {
            idle_threshold_ms: secs_to_ms(self.idle_threshold_secs),
            check_interval_ms: secs_to_ms(self.idle_check_interval_secs),
        }
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

/// Returns the platform-specific config directory for st.
///
/// On Linux: `~/.config/st`
pub fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("st"))
}
