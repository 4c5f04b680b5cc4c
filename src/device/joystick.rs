//! Driver interface for the classic polling joystick API.
//!
//! [`JoyInfoEx`] mirrors the native `JOYINFOEX` record field for field. The
//! [`JoystickApi`] trait is the seam between the poller and the operating system so the
//! rest of the pipeline runs (and is tested) without a physical device.

use crate::config::AxisSource;
use tracing::{debug, info};

/// `dwFlags` bits understood by `joyGetPosEx`.
pub struct AxisFlags;

impl AxisFlags {
    pub const RETURN_X: u32 = 0x0001;
    pub const RETURN_Y: u32 = 0x0002;
    pub const RETURN_Z: u32 = 0x0004;
    pub const RETURN_R: u32 = 0x0008;
    pub const RETURN_U: u32 = 0x0010;
    pub const RETURN_V: u32 = 0x0020;
    pub const RETURN_POV: u32 = 0x0040;
    pub const RETURN_BUTTONS: u32 = 0x0080;
    pub const RETURN_ALL: u32 = 0x00FF;
    pub const RETURN_RAW_DATA: u32 = 0x0100;

    pub fn for_axis(axis: AxisSource) -> u32 {
        match axis {
            AxisSource::X => Self::RETURN_X,
            AxisSource::Y => Self::RETURN_Y,
            AxisSource::Z => Self::RETURN_Z,
            AxisSource::R => Self::RETURN_R,
            AxisSource::U => Self::RETURN_U,
            AxisSource::V => Self::RETURN_V,
        }
    }

    /// Flags requesting exactly the given axes, optionally at raw resolution.
    pub fn request(axes: &[AxisSource], raw_data: bool) -> u32 {
        let axes = axes.iter().fold(0, |acc, axis| acc | Self::for_axis(*axis));
        if raw_data {
            axes | Self::RETURN_RAW_DATA
        } else {
            axes
        }
    }
}

/// Request/response record for one position read.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JoyInfoEx {
    pub size: u32,
    pub flags: u32,
    pub x_pos: u32,
    pub y_pos: u32,
    pub z_pos: u32,
    pub r_pos: u32,
    pub u_pos: u32,
    pub v_pos: u32,
    pub buttons: u32,
    pub button_number: u32,
    pub pov: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

impl JoyInfoEx {
    pub const SIZE: u32 = std::mem::size_of::<JoyInfoEx>() as u32;

    /// A zeroed record carrying only its size and the requested flags.
    pub fn prepared(flags: u32) -> Self {
        Self {
            size: Self::SIZE,
            flags,
            ..Self::default()
        }
    }

    pub fn axis(&self, axis: AxisSource) -> u32 {
        match axis {
            AxisSource::X => self.x_pos,
            AxisSource::Y => self.y_pos,
            AxisSource::Z => self.z_pos,
            AxisSource::R => self.r_pos,
            AxisSource::U => self.u_pos,
            AxisSource::V => self.v_pos,
        }
    }
}

/// Identification exposed by a device slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCaps {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("Driver returned error code {0}")]
    Code(u32),

    #[error("Joystick API is not available on this platform")]
    Unsupported,
}

/// Native joystick calls used by the poller.
pub trait JoystickApi: Send {
    /// Number of device slots the driver exposes.
    fn device_count(&self) -> u32;

    fn device_caps(&self, id: u32) -> Result<DeviceCaps, DriverError>;

    /// Fills `info` for device `id`. `info` arrives zeroed with size and flags set.
    fn read_position(&mut self, id: u32, info: &mut JoyInfoEx) -> Result<(), DriverError>;
}

/// Driver used when the platform has no classic joystick API. Every read fails, so the
/// monitor keeps ticking and reports the device as disconnected.
#[derive(Debug, Default)]
pub struct UnsupportedJoystick;

impl JoystickApi for UnsupportedJoystick {
    fn device_count(&self) -> u32 {
        0
    }

    fn device_caps(&self, _id: u32) -> Result<DeviceCaps, DriverError> {
        Err(DriverError::Unsupported)
    }

    fn read_position(&mut self, _id: u32, _info: &mut JoyInfoEx) -> Result<(), DriverError> {
        Err(DriverError::Unsupported)
    }
}

#[cfg(windows)]
mod winmm {
    use super::{DeviceCaps, DriverError, JoyInfoEx, JoystickApi};
    use windows::Win32::Media::Multimedia::{
        joyGetDevCapsW, joyGetNumDevs, joyGetPosEx, JOYCAPSW, JOYINFOEX,
    };

    const JOYERR_NOERROR: u32 = 0;

    /// winmm-backed driver.
    #[derive(Debug, Default)]
    pub struct WinMmJoystick;

    impl JoystickApi for WinMmJoystick {
        fn device_count(&self) -> u32 {
            // SAFETY: joyGetNumDevs takes no arguments and only reads driver state.
            unsafe { joyGetNumDevs() }
        }

        fn device_caps(&self, id: u32) -> Result<DeviceCaps, DriverError> {
            let mut caps = JOYCAPSW::default();
            // SAFETY: `caps` is a live, writable JOYCAPSW and the size argument is its size.
            let code = unsafe {
                joyGetDevCapsW(id as usize, &mut caps, std::mem::size_of::<JOYCAPSW>() as u32)
            };
            if code != JOYERR_NOERROR {
                return Err(DriverError::Code(code));
            }
            let name_len = caps
                .szPname
                .iter()
                .position(|c| *c == 0)
                .unwrap_or(caps.szPname.len());
            Ok(DeviceCaps {
                vendor_id: caps.wMid,
                product_id: caps.wPid,
                name: String::from_utf16_lossy(&caps.szPname[..name_len]),
            })
        }

        fn read_position(&mut self, id: u32, info: &mut JoyInfoEx) -> Result<(), DriverError> {
            let mut native = JOYINFOEX {
                dwSize: std::mem::size_of::<JOYINFOEX>() as u32,
                dwFlags: info.flags,
                ..Default::default()
            };
            // SAFETY: `native` is a live JOYINFOEX with dwSize initialised as required.
            let code = unsafe { joyGetPosEx(id, &mut native) };
            if code != JOYERR_NOERROR {
                return Err(DriverError::Code(code));
            }
            info.x_pos = native.dwXpos;
            info.y_pos = native.dwYpos;
            info.z_pos = native.dwZpos;
            info.r_pos = native.dwRpos;
            info.u_pos = native.dwUpos;
            info.v_pos = native.dwVpos;
            info.buttons = native.dwButtons;
            info.button_number = native.dwButtonNumber;
            info.pov = native.dwPOV;
            Ok(())
        }
    }
}

#[cfg(windows)]
pub use winmm::WinMmJoystick;

/// Driver for the current platform.
pub fn default_api() -> Box<dyn JoystickApi> {
    #[cfg(windows)]
    {
        info!("Using winmm joystick driver");
        Box::new(WinMmJoystick)
    }
    #[cfg(not(windows))]
    {
        info!("No joystick driver on this platform; device will report as unavailable");
        debug!("Falling back to UnsupportedJoystick");
        Box::new(UnsupportedJoystick)
    }
}
