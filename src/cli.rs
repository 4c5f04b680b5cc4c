//! Command line surface. Every option is an override layered on top of the file and
//! environment configuration; options that are not given leave lower layers untouched.

use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

fn parse_hex_u16(value: &str) -> Result<u16, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex id '{value}': {e}"))
}

/// Monitor pedal axes for clutch noise and gas drift, and stream telemetry frames.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "pedal-monitor", version, about)]
pub struct CliArgs {
    /// Configuration file (TOML).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the built-in defaults as TOML and exit.
    #[arg(long)]
    pub print_default_config: bool,

    /// Joystick ID (0-15).
    #[arg(long)]
    pub joystick: Option<u32>,

    /// Vendor ID in hex (e.g. 0EB7) for auto-detection and reconnection.
    #[arg(long, value_parser = parse_hex_u16)]
    pub vendor_id: Option<u16>,

    /// Product ID in hex (e.g. 1839) for auto-detection and reconnection.
    #[arg(long, value_parser = parse_hex_u16)]
    pub product_id: Option<u16>,

    /// Wait time between iterations in milliseconds.
    #[arg(long = "sleep")]
    pub sleep_ms: Option<u64>,

    /// Number of iterations; 0 loops until shutdown.
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Enable clutch noise monitoring.
    #[arg(long)]
    pub monitor_clutch: bool,

    /// Enable gas drift monitoring.
    #[arg(long)]
    pub monitor_gas: bool,

    /// Use raw axis values as reported (0 = idle) instead of mirroring them.
    #[arg(long)]
    pub no_axis_normalization: bool,

    /// Request high-resolution raw data (0-1023).
    #[arg(long)]
    pub raw: bool,

    /// Clutch stickiness tolerance in percent (0-100).
    #[arg(long)]
    pub margin: Option<u8>,

    /// Consecutive samples required for a clutch noise alert.
    #[arg(long)]
    pub clutch_repeat: Option<u32>,

    /// Gas idle deadzone in percent.
    #[arg(long)]
    pub gas_deadzone_in: Option<u8>,

    /// Gas full-throttle threshold in percent.
    #[arg(long)]
    pub gas_deadzone_out: Option<u8>,

    /// Seconds to wait for full throttle while racing.
    #[arg(long)]
    pub gas_window: Option<u64>,

    /// Seconds between gas drift alerts.
    #[arg(long)]
    pub gas_cooldown: Option<u64>,

    /// Seconds of idle gas before assuming a menu or pause.
    #[arg(long)]
    pub gas_timeout: Option<u64>,

    /// Minimum gas usage in percent within a window before a drift alert.
    #[arg(long)]
    pub gas_min_usage: Option<u8>,

    /// Estimate and announce a suggested gas deadzone-out.
    #[arg(long)]
    pub estimate_gas_deadzone_out: bool,

    /// Auto-decrease gas deadzone-out to the estimate, never below N.
    #[arg(long = "adjust-deadzone-out-with-minimum")]
    pub auto_adjust_minimum: Option<u8>,

    /// Log every sample.
    #[arg(long)]
    pub verbose: bool,

    /// With --verbose, log raw values next to normalized ones.
    #[arg(long)]
    pub debug_raw: bool,

    /// Port of the pull endpoint.
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Port of the WebSocket push endpoint.
    #[arg(long)]
    pub ws_port: Option<u16>,

    /// Disable the telemetry endpoints.
    #[arg(long)]
    pub no_telemetry: bool,

    /// Disable spoken alerts.
    #[arg(long)]
    pub no_alerts: bool,
}

/// Sparse mirror of [`crate::config::MonitorConfig`]; absent fields are not serialized
/// and therefore do not override lower layers.
#[derive(Serialize, Debug, Default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iterations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug_raw: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    monitor_clutch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    monitor_gas: Option<bool>,
    device: DeviceOverrides,
    pedals: PedalOverrides,
    clutch: ClutchOverrides,
    gas: GasOverrides,
    telemetry: TelemetryOverrides,
    alerts: AlertOverrides,
}

#[derive(Serialize, Debug, Default)]
struct DeviceOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    joystick_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vendor_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    axis_normalization: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_data: Option<bool>,
}

#[derive(Serialize, Debug, Default)]
struct PedalOverrides {
    gas: DeadzoneOverrides,
}

#[derive(Serialize, Debug, Default)]
struct DeadzoneOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    deadzone_in: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deadzone_out: Option<u8>,
}

#[derive(Serialize, Debug, Default)]
struct ClutchOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    margin_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat: Option<u32>,
}

#[derive(Serialize, Debug, Default)]
struct GasOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    window_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cooldown_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_usage_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimate_deadzone_out: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_adjust_minimum: Option<u8>,
}

#[derive(Serialize, Debug, Default)]
struct TelemetryOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ws_port: Option<u16>,
}

#[derive(Serialize, Debug, Default)]
struct AlertOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
}

/// Flag-style switches only ever turn a feature on (or off for `--no-*`); leaving
/// them out keeps whatever the file or environment said.
fn flag(set: bool, value: bool) -> Option<bool> {
    set.then_some(value)
}

impl CliArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            poll_interval_ms: self.sleep_ms,
            iterations: self.iterations,
            verbose: flag(self.verbose, true),
            debug_raw: flag(self.debug_raw, true),
            monitor_clutch: flag(self.monitor_clutch, true),
            monitor_gas: flag(self.monitor_gas, true),
            device: DeviceOverrides {
                joystick_id: self.joystick,
                vendor_id: self.vendor_id,
                product_id: self.product_id,
                axis_normalization: flag(self.no_axis_normalization, false),
                raw_data: flag(self.raw, true),
            },
            pedals: PedalOverrides {
                gas: DeadzoneOverrides {
                    deadzone_in: self.gas_deadzone_in,
                    deadzone_out: self.gas_deadzone_out,
                },
            },
            clutch: ClutchOverrides {
                margin_percent: self.margin,
                repeat: self.clutch_repeat,
            },
            gas: GasOverrides {
                window_s: self.gas_window,
                cooldown_s: self.gas_cooldown,
                timeout_s: self.gas_timeout,
                min_usage_percent: self.gas_min_usage,
                estimate_deadzone_out: flag(self.estimate_gas_deadzone_out, true),
                auto_adjust_minimum: self.auto_adjust_minimum,
            },
            telemetry: TelemetryOverrides {
                enabled: flag(self.no_telemetry, false),
                http_port: self.http_port,
                ws_port: self.ws_port,
            },
            alerts: AlertOverrides {
                enabled: flag(self.no_alerts, false),
            },
        }
    }
}
