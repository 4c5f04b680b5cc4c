//! Device poller: one position read per tick.
//!
//! The poller never retries inline. A failed read surfaces as
//! [`PollError::DeviceUnavailable`]; the tick loop latches the disconnect and keeps
//! calling [`DevicePoller::poll`] at the normal cadence. When the device was selected by
//! vendor/product id, a failed read also forgets the slot and later polls re-run the
//! enumeration (at most once per backoff period) until the device shows up again,
//! possibly in a different slot.

use crate::config::{AxisSource, DeviceConfig};
use crate::device::joystick::{AxisFlags, JoyInfoEx, JoystickApi};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How the monitored device is found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceSelector {
    Id(u32),
    VendorProduct {
        vendor_id: u16,
        product_id: u16,
        /// Slot to try until the first enumeration finds the device.
        fallback_id: Option<u32>,
    },
}

impl DeviceSelector {
    pub fn from_config(device: &DeviceConfig) -> Option<Self> {
        match (device.vendor_product(), device.joystick_id) {
            (Some((vendor_id, product_id)), fallback_id) => Some(Self::VendorProduct {
                vendor_id,
                product_id,
                fallback_id,
            }),
            (None, Some(id)) => Some(Self::Id(id)),
            (None, None) => None,
        }
    }
}

/// Pedal axis assignment inside the position record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AxisMap {
    pub gas: AxisSource,
    pub brake: AxisSource,
    pub clutch: AxisSource,
}

impl AxisMap {
    pub fn from_config(device: &DeviceConfig) -> Self {
        Self {
            gas: device.gas_axis,
            brake: device.brake_axis,
            clutch: device.clutch_axis,
        }
    }
}

/// Raw axis integers of one successful poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawSample {
    pub joystick_id: u32,
    pub gas: u32,
    pub brake: u32,
    pub clutch: u32,
    pub at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("Device unavailable (slot {slot:?}): {reason}")]
    DeviceUnavailable { slot: Option<u32>, reason: String },
}

pub struct DevicePoller {
    api: Box<dyn JoystickApi>,
    selector: DeviceSelector,
    axes: AxisMap,
    flags: u32,
    request: JoyInfoEx,
    active_id: Option<u32>,
    last_scan: Option<Instant>,
    reconnect_backoff: Duration,
    released: bool,
}

impl DevicePoller {
    pub fn new(
        api: Box<dyn JoystickApi>,
        selector: DeviceSelector,
        axes: AxisMap,
        raw_data: bool,
        reconnect_backoff: Duration,
    ) -> Self {
        let flags = AxisFlags::request(&[axes.gas, axes.brake, axes.clutch], raw_data);
        debug!("Creating DevicePoller: {:?}, flags={:#06x}", selector, flags);

        let mut poller = Self {
            api,
            selector,
            axes,
            flags,
            request: JoyInfoEx::prepared(flags),
            active_id: None,
            last_scan: None,
            reconnect_backoff,
            released: false,
        };
        poller.active_id = poller.initial_slot();
        poller
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn active_id(&self) -> Option<u32> {
        self.active_id
    }

    fn initial_slot(&mut self) -> Option<u32> {
        match self.selector {
            DeviceSelector::Id(id) => Some(id),
            DeviceSelector::VendorProduct {
                vendor_id,
                product_id,
                fallback_id,
            } => {
                info!(
                    "Looking for controller VID:{:04X} PID:{:04X}",
                    vendor_id, product_id
                );
                let found = self.find_device(vendor_id, product_id);
                self.last_scan = None;
                match found {
                    Some(id) => {
                        info!("Found controller at ID {}", id);
                        Some(id)
                    }
                    None => {
                        warn!(
                            "Controller not found at startup, using ID {:?} until error",
                            fallback_id
                        );
                        fallback_id
                    }
                }
            }
        }
    }

    /// Enumerates every slot and returns the first one exposing the vendor/product
    /// pair. Pure with respect to poller state, so it can run any number of times.
    pub fn find_device(&self, vendor_id: u16, product_id: u16) -> Option<u32> {
        let count = self.api.device_count();
        (0..count).find(|id| match self.api.device_caps(*id) {
            Ok(caps) => {
                debug!(
                    "Slot {}: VID:{:04X} PID:{:04X} {}",
                    id, caps.vendor_id, caps.product_id, caps.name
                );
                caps.vendor_id == vendor_id && caps.product_id == product_id
            }
            Err(_) => false,
        })
    }

    /// Slot to read this tick, re-enumerating when the selector allows it.
    fn resolve_slot(&mut self, now: Instant) -> Result<u32, PollError> {
        if let Some(id) = self.active_id {
            return Ok(id);
        }

        let DeviceSelector::VendorProduct {
            vendor_id,
            product_id,
            ..
        } = self.selector
        else {
            return Err(PollError::DeviceUnavailable {
                slot: None,
                reason: "no device selected".into(),
            });
        };

        if let Some(last) = self.last_scan {
            if now.saturating_duration_since(last) < self.reconnect_backoff {
                return Err(PollError::DeviceUnavailable {
                    slot: None,
                    reason: "waiting for next device scan".into(),
                });
            }
        }

        self.last_scan = Some(now);
        match self.find_device(vendor_id, product_id) {
            Some(id) => {
                info!("Controller found at ID {}", id);
                self.active_id = Some(id);
                Ok(id)
            }
            None => {
                debug!("Scan failed, controller not present");
                Err(PollError::DeviceUnavailable {
                    slot: None,
                    reason: "controller not found".into(),
                })
            }
        }
    }

    /// Performs one read. The request record is zeroed and re-initialised first, so
    /// nothing from an earlier (possibly failed) read can leak into this result.
    pub fn poll(&mut self, now: Instant) -> Result<RawSample, PollError> {
        if self.released {
            return Err(PollError::DeviceUnavailable {
                slot: None,
                reason: "device handle released".into(),
            });
        }

        let id = self.resolve_slot(now)?;
        self.request = JoyInfoEx::prepared(self.flags);

        match self.api.read_position(id, &mut self.request) {
            Ok(()) => Ok(RawSample {
                joystick_id: id,
                gas: self.request.axis(self.axes.gas),
                brake: self.request.axis(self.axes.brake),
                clutch: self.request.axis(self.axes.clutch),
                at: now,
            }),
            Err(e) => {
                if matches!(self.selector, DeviceSelector::VendorProduct { .. }) {
                    self.active_id = None;
                    self.last_scan = Some(now);
                }
                Err(PollError::DeviceUnavailable {
                    slot: Some(id),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Releases the device. Idempotent; later polls report the device as unavailable.
    pub fn release(&mut self) {
        if !self.released {
            info!("Releasing joystick device {:?}", self.active_id);
            self.released = true;
            self.active_id = None;
        }
    }
}

impl Drop for DevicePoller {
    fn drop(&mut self) {
        self.release();
    }
}
