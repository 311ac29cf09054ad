//! Rig configuration – reads/writes `~/.rover/config.toml`.
//!
//! The file is parsed leniently (every field has a default) and then
//! [`Config::validate`]d into a [`RigConfig`] before any hardware is touched.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use rover_kernel::ReconnectPolicy;
use rover_runtime::RoverConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("hub port for {device} must be non-negative, got {value}")]
    NegativeHubPort { device: &'static str, value: i32 },

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("invalid rover endpoint: {0}")]
    Endpoint(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// File layout
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted rig configuration stored in `~/.rover/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rover: RoverSection,
    #[serde(default)]
    pub hubs: HubSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub safety: SafetySection,
    #[serde(default)]
    pub mission: MissionSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoverSection {
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Hub port index of each device. Signed so that a negative value in the
/// file is reported by [`Config::validate`] instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubSection {
    #[serde(default = "default_motors_hub")]
    pub motors: i32,
    #[serde(default = "default_sonar_hub")]
    pub sonar: i32,
    #[serde(default = "default_tof_left_hub")]
    pub tof_left: i32,
    #[serde(default)]
    pub tof_right: i32,
    #[serde(default = "default_climate_hub")]
    pub humidity: i32,
    #[serde(default = "default_climate_hub")]
    pub temperature: i32,
    #[serde(default = "default_light_hub")]
    pub light: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_control_period_ms")]
    pub control_period_ms: u64,
    #[serde(default = "default_ui_period_ms")]
    pub ui_period_ms: u64,
    #[serde(default = "default_control_period_ms")]
    pub input_period_ms: u64,
    #[serde(default = "default_vehicle_reconnect_ms")]
    pub vehicle_reconnect_ms: u64,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySection {
    #[serde(default = "default_obstacle_on_mm")]
    pub obstacle_on_mm: f64,
    #[serde(default = "default_obstacle_off_delta_mm")]
    pub obstacle_off_delta_mm: f64,
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
    #[serde(default)]
    pub block_forward_on_obstacle: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSection {
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_server_name() -> String {
    "MaxRover".to_string()
}
fn default_address() -> String {
    "10.18.1.152".to_string()
}
fn default_port() -> u16 {
    5661
}
fn default_motors_hub() -> i32 {
    4
}
fn default_sonar_hub() -> i32 {
    3
}
fn default_tof_left_hub() -> i32 {
    5
}
fn default_climate_hub() -> i32 {
    2
}
fn default_light_hub() -> i32 {
    1
}
fn default_control_period_ms() -> u64 {
    50
}
fn default_ui_period_ms() -> u64 {
    200
}
fn default_vehicle_reconnect_ms() -> u64 {
    2000
}
fn default_startup_timeout_ms() -> u64 {
    2000
}
fn default_obstacle_on_mm() -> f64 {
    250.0
}
fn default_obstacle_off_delta_mm() -> f64 {
    60.0
}
fn default_staleness_ms() -> u64 {
    1200
}
fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

impl Default for RoverSection {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            address: default_address(),
            port: default_port(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            motors: default_motors_hub(),
            sonar: default_sonar_hub(),
            tof_left: default_tof_left_hub(),
            tof_right: 0,
            humidity: default_climate_hub(),
            temperature: default_climate_hub(),
            light: default_light_hub(),
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            control_period_ms: default_control_period_ms(),
            ui_period_ms: default_ui_period_ms(),
            input_period_ms: default_control_period_ms(),
            vehicle_reconnect_ms: default_vehicle_reconnect_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

impl Default for SafetySection {
    fn default() -> Self {
        Self {
            obstacle_on_mm: default_obstacle_on_mm(),
            obstacle_off_delta_mm: default_obstacle_off_delta_mm(),
            staleness_ms: default_staleness_ms(),
            block_forward_on_obstacle: false,
        }
    }
}

impl Default for MissionSection {
    fn default() -> Self {
        Self {
            report_dir: default_report_dir(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validated form
// ─────────────────────────────────────────────────────────────────────────────

/// Hub port indices after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubPorts {
    pub motors: u32,
    pub sonar: u32,
    pub tof_left: u32,
    pub tof_right: u32,
    pub humidity: u32,
    pub temperature: u32,
    pub light: u32,
}

/// Everything needed to wire a rover, checked.
#[derive(Debug, Clone)]
pub struct RigConfig {
    pub server_name: String,
    pub address: String,
    pub port: u16,
    pub hubs: HubPorts,
    pub rover: RoverConfig,
    pub report_dir: PathBuf,
}

fn hub(device: &'static str, value: i32) -> Result<u32, ConfigError> {
    u32::try_from(value).map_err(|_| ConfigError::NegativeHubPort { device, value })
}

fn positive_ms(field: &'static str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::NotPositive(field));
    }
    Ok(Duration::from_millis(ms))
}

impl Config {
    pub fn validate(&self) -> Result<RigConfig, ConfigError> {
        if self.rover.address.trim().is_empty() {
            return Err(ConfigError::Endpoint("address is empty".to_string()));
        }
        if self.rover.port == 0 {
            return Err(ConfigError::Endpoint("port is 0".to_string()));
        }

        let h = &self.hubs;
        let hubs = HubPorts {
            motors: hub("motors", h.motors)?,
            sonar: hub("sonar", h.sonar)?,
            tof_left: hub("tof_left", h.tof_left)?,
            tof_right: hub("tof_right", h.tof_right)?,
            humidity: hub("humidity", h.humidity)?,
            temperature: hub("temperature", h.temperature)?,
            light: hub("light", h.light)?,
        };

        let t = &self.timing;
        let s = &self.safety;
        if !(s.obstacle_on_mm.is_finite() && s.obstacle_on_mm > 0.0) {
            return Err(ConfigError::NotPositive("safety.obstacle_on_mm"));
        }
        if !(s.obstacle_off_delta_mm.is_finite() && s.obstacle_off_delta_mm > 0.0) {
            return Err(ConfigError::NotPositive("safety.obstacle_off_delta_mm"));
        }

        let mut rover = RoverConfig::default();
        rover.teleop.period = positive_ms("timing.control_period_ms", t.control_period_ms)?;
        rover.teleop.ui_period = positive_ms("timing.ui_period_ms", t.ui_period_ms)?;
        rover.teleop.reconnect = ReconnectPolicy::fixed(positive_ms(
            "timing.vehicle_reconnect_ms",
            t.vehicle_reconnect_ms,
        )?);
        rover.input.period = positive_ms("timing.input_period_ms", t.input_period_ms)?;
        rover.startup_timeout = positive_ms("timing.startup_timeout_ms", t.startup_timeout_ms)?;
        rover.safety.obstacle_on_mm = s.obstacle_on_mm;
        rover.safety.obstacle_off_delta_mm = s.obstacle_off_delta_mm;
        rover.safety.staleness = positive_ms("safety.staleness_ms", s.staleness_ms)?;
        rover.safety.block_forward_on_obstacle = s.block_forward_on_obstacle;

        Ok(RigConfig {
            server_name: self.rover.server_name.clone(),
            address: self.rover.address.clone(),
            port: self.rover.port,
            hubs,
            rover,
            report_dir: self.mission.report_dir.clone(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// `ROVER_CONFIG` if set, otherwise `~/.rover/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("ROVER_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rover").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, ConfigError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: Config = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ROVER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROVER_SERVER_NAME` | `rover.server_name` |
/// | `ROVER_ADDRESS` | `rover.address` |
/// | `ROVER_PORT` | `rover.port` |
/// | `ROVER_REPORT_DIR` | `mission.report_dir` |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ROVER_SERVER_NAME") {
        cfg.rover.server_name = v;
    }
    if let Ok(v) = std::env::var("ROVER_ADDRESS") {
        cfg.rover.address = v;
    }
    if let Ok(v) = std::env::var("ROVER_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.rover.port = port;
    }
    if let Ok(v) = std::env::var("ROVER_REPORT_DIR") {
        cfg.mission.report_dir = PathBuf::from(v);
    }
}

pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
