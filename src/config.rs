use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
    time::Duration,
};

pub const API_URL_ENV: &str = "ATTENDANCE_API_URL";
pub const DEBUG_ENV: &str = "ATTENDANCE_DEBUG";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const SOCKET_PATH: &str = "/ws";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplerConfig {
    pub interval_ms: u64,
    pub target_width: u32,
    pub target_height: u32,
    /// JPEG quality, 1..=100.
    pub quality: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            target_width: 640,
            target_height: 480,
            quality: 50,
        }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_width == 0 || self.target_height == 0 {
            bail!(
                "sampler target size must be non-zero, got {}x{}",
                self.target_width,
                self.target_height
            );
        }
        if !(1..=100).contains(&self.quality) {
            bail!("sampler quality must be within 1..=100, got {}", self.quality);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 30_000,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsoleConfig {
    pub api_base_url: String,
    pub sampler: SamplerConfig,
    pub reconnect: ReconnectPolicy,
    pub attendance_feed_limit: usize,
    pub http_timeout_ms: u64,
    /// Checkpoint the running session every tick instead of every tenth.
    #[serde(skip)]
    pub debug: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            sampler: SamplerConfig::default(),
            reconnect: ReconnectPolicy::default(),
            attendance_feed_limit: 100,
            http_timeout_ms: 10_000,
            debug: false,
        }
    }
}

impl ConsoleConfig {
    /// Push channel address derived from the REST base: `http` becomes `ws`,
    /// `https` becomes `wss`, and the socket path is appended.
    pub fn socket_url(&self) -> Result<String> {
        let base = self.api_base_url.trim_end_matches('/');
        let converted = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            bail!("api base url must start with http:// or https://, got {base}");
        };
        Ok(format!("{converted}{SOCKET_PATH}"))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn heartbeat_every_ticks(&self) -> u32 {
        if self.debug {
            1
        } else {
            10
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        self.debug = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
    }
}

/// Settings file backing [`ConsoleConfig`]. Missing or unreadable JSON falls
/// back to defaults; environment overrides are applied on every load.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ConsoleConfig>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("Ignoring malformed settings at {}: {err}", path.display());
                ConsoleConfig::default()
            })
        } else {
            ConsoleConfig::default()
        };
        data.apply_env_overrides();
        data.sampler.validate()?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn config(&self) -> ConsoleConfig {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_sampler(&self, sampler: SamplerConfig) -> Result<()> {
        sampler.validate()?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.sampler = sampler;
        self.persist(&guard)
    }

    pub fn update_api_base_url(&self, url: String) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut guard.api_base_url, url);
        if let Err(err) = guard.socket_url() {
            guard.api_base_url = previous;
            return Err(err);
        }
        self.persist(&guard)
    }

    fn persist(&self, data: &ConsoleConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
