//! # Monitor Configuration
//!
//! One strongly typed [`MonitorConfig`] is resolved once at startup and handed to the
//! tick pipeline as read-only data. Sources are layered with figment, later layers
//! winning:
//!
//! ```text
//! MonitorConfig::default()  <  TOML file  <  PEDAL_MONITOR_* env  <  command line
//! ```
//!
//! The file layer uses the explicit `--config` path when given, otherwise
//! `<config_dir>/pedal-monitor/config.toml` if it exists. Nested keys in the
//! environment use a double underscore, e.g. `PEDAL_MONITOR_GAS__WINDOW_S=45`.
//!
//! Validation runs exactly once after merging; an invalid configuration is fatal at
//! startup and is never re-checked while the loop runs.

use crate::cli::CliArgs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Highest joystick slot addressable by the classic joystick API.
pub const MAX_JOYSTICK_ID: u32 = 15;

const ENV_PREFIX: &str = "PEDAL_MONITOR_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Joystick axis a pedal is wired to.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AxisSource {
    X,
    Y,
    Z,
    R,
    U,
    V,
}

/// Device selection and raw reporting options.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Explicit joystick slot (0-15). Used directly, or as the starting slot when a
    /// vendor/product pair is also given.
    pub joystick_id: Option<u32>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// Mirror the axes so that 0 = released and axis max = fully pressed.
    pub axis_normalization: bool,
    /// Request high-resolution raw values (0-1023) instead of 0-65535.
    pub raw_data: bool,
    /// Minimum delay between two vendor/product enumeration passes while disconnected.
    pub reconnect_backoff_ms: u64,
    pub gas_axis: AxisSource,
    pub brake_axis: AxisSource,
    pub clutch_axis: AxisSource,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            joystick_id: None,
            vendor_id: None,
            product_id: None,
            axis_normalization: true,
            raw_data: false,
            reconnect_backoff_ms: 1000,
            gas_axis: AxisSource::Y,
            brake_axis: AxisSource::X,
            clutch_axis: AxisSource::R,
        }
    }
}

impl DeviceConfig {
    /// Vendor/product pair, only when both halves are present.
    pub fn vendor_product(&self) -> Option<(u16, u16)> {
        match (self.vendor_id, self.product_id) {
            (Some(vendor), Some(product)) => Some((vendor, product)),
            _ => None,
        }
    }
}

/// Idle band and full-travel band of one pedal, in percent of the axis range.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct AxisDeadzone {
    pub deadzone_in: u8,
    pub deadzone_out: u8,
}

impl Default for AxisDeadzone {
    fn default() -> Self {
        Self {
            deadzone_in: 5,
            deadzone_out: 93,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PedalConfig {
    pub gas: AxisDeadzone,
    pub brake: AxisDeadzone,
    pub clutch: AxisDeadzone,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ClutchConfig {
    /// Largest sample-to-sample movement (percent of range) still counted as "stuck".
    pub margin_percent: u8,
    /// Consecutive stuck samples before an alert.
    pub repeat: u32,
}

impl Default for ClutchConfig {
    fn default() -> Self {
        Self {
            margin_percent: 5,
            repeat: 4,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct GasConfig {
    pub window_s: u64,
    pub cooldown_s: u64,
    pub timeout_s: u64,
    pub min_usage_percent: u8,
    /// Announce a suggested deadzone-out from the observed peak travel.
    pub estimate_deadzone_out: bool,
    /// Lower the effective deadzone-out to the estimate, never below this value.
    pub auto_adjust_minimum: Option<u8>,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            window_s: 30,
            cooldown_s: 60,
            timeout_s: 10,
            min_usage_percent: 20,
            estimate_deadzone_out: false,
            auto_adjust_minimum: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub bind_address: IpAddr,
    /// Pull endpoint and shutdown path.
    pub http_port: u16,
    /// WebSocket push endpoint.
    pub ws_port: u16,
    /// A subscriber is skipped for a tick once its unsent bytes exceed this many frames.
    pub backlog_frame_multiple: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: 8181,
            ws_port: 8182,
            backlog_frame_multiple: 4,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub queue_capacity: usize,
    /// External speech command; the phrase is appended as the last argument.
    /// Empty means phrases are only logged.
    pub command: Vec<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 16,
            command: Vec::new(),
        }
    }
}

/// Complete, validated configuration for one run.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    /// Number of ticks before stopping; 0 runs until shutdown.
    pub iterations: u64,
    pub verbose: bool,
    pub debug_raw: bool,
    pub monitor_clutch: bool,
    pub monitor_gas: bool,
    pub device: DeviceConfig,
    pub pedals: PedalConfig,
    pub clutch: ClutchConfig,
    pub gas: GasConfig,
    pub telemetry: TelemetryConfig,
    pub alerts: AlertConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            iterations: 0,
            verbose: false,
            debug_raw: false,
            monitor_clutch: false,
            monitor_gas: false,
            device: DeviceConfig::default(),
            pedals: PedalConfig::default(),
            clutch: ClutchConfig::default(),
            gas: GasConfig::default(),
            telemetry: TelemetryConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Resolves all layers for the given command line and validates the result.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let file = args.config.clone().or_else(default_config_path);
        let config = Self::from_layers(file.as_deref(), Env::prefixed(ENV_PREFIX).split("__"), args)?;
        config.validate()?;
        info!("Configuration resolved: {:?}", config);
        Ok(config)
    }

    /// Merges defaults, an optional TOML file, an environment provider and the
    /// command line overrides without validating.
    pub fn from_layers(
        file: Option<&Path>,
        env: Env,
        args: &CliArgs,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(MonitorConfig::default()));

        match file {
            Some(path) if path.exists() => {
                debug!("Merging configuration file {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
            Some(path) => warn!("Config file not found: {}. Using defaults.", path.display()),
            None => debug!("No configuration file in use"),
        }

        figment = figment
            .merge(env)
            .merge(Serialized::defaults(args.overrides()));

        figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every bound once. Errors name the offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be > 0".into());
        }

        let device = &self.device;
        if device.vendor_id.is_some() != device.product_id.is_some() {
            return invalid("vendor_id and product_id must be given together".into());
        }
        match (device.joystick_id, device.vendor_product()) {
            (None, None) => {
                return invalid("select a device with joystick_id or vendor_id/product_id".into())
            }
            (Some(id), None) if id > MAX_JOYSTICK_ID => {
                return invalid(format!("joystick_id must be 0-{MAX_JOYSTICK_ID}, got {id}"))
            }
            _ => {}
        }

        for (name, zone) in [
            ("gas", self.pedals.gas),
            ("brake", self.pedals.brake),
            ("clutch", self.pedals.clutch),
        ] {
            if zone.deadzone_in > 100 || zone.deadzone_out > 100 {
                return invalid(format!("{name} deadzones must be 0-100"));
            }
        }

        if self.clutch.margin_percent > 100 {
            return invalid("clutch margin must be 0-100".into());
        }
        if self.clutch.repeat == 0 {
            return invalid("clutch repeat must be > 0".into());
        }

        let gas = &self.gas;
        if gas.window_s == 0 {
            return invalid("gas window must be > 0".into());
        }
        if gas.timeout_s == 0 {
            return invalid("gas timeout must be > 0".into());
        }
        if gas.cooldown_s == 0 {
            return invalid("gas cooldown must be > 0".into());
        }
        if gas.min_usage_percent > 100 {
            return invalid("gas min usage must be 0-100".into());
        }
        if gas.estimate_deadzone_out && !self.monitor_gas {
            return invalid("estimate_deadzone_out requires monitor_gas".into());
        }
        if let Some(minimum) = gas.auto_adjust_minimum {
            if minimum > 100 {
                return invalid("auto_adjust_minimum must be 0-100".into());
            }
            if !self.monitor_gas {
                return invalid("auto_adjust_minimum requires monitor_gas".into());
            }
            if !gas.estimate_deadzone_out {
                return invalid("auto_adjust_minimum also requires estimate_deadzone_out".into());
            }
            if minimum > self.pedals.gas.deadzone_out {
                return invalid(format!(
                    "auto_adjust_minimum ({minimum}) must be <= gas deadzone_out ({})",
                    self.pedals.gas.deadzone_out
                ));
            }
        }

        if self.telemetry.enabled {
            if self.telemetry.backlog_frame_multiple == 0 {
                return invalid("backlog_frame_multiple must be > 0".into());
            }
            if self.telemetry.http_port == self.telemetry.ws_port {
                return invalid("http_port and ws_port must differ".into());
            }
        }
        if self.alerts.enabled && self.alerts.queue_capacity == 0 {
            return invalid("alert queue_capacity must be > 0".into());
        }

        Ok(())
    }
}

/// `<config_dir>/pedal-monitor/config.toml`, when a config directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pedal-monitor").join("config.toml"))
}
