//! Device subsystem for pedal axis sampling
//!
//! Implements the first two stages of every tick:
//!
//! 1. [`joystick`] - Driver interface and the fixed-size position record
//! 2. [`poller`] - One read per tick, device selection and reconnect policy
//! 3. [`normalize`] - Mapping raw units into the `0 = released` travel space
//!
//! # Architecture
//!
//! ```text
//! JoystickApi ──► DevicePoller ──► AxisNormalizer ──► NormalizedSample
//!                 (RawSample)      (per-axis percent)
//! ```

pub mod joystick;
pub mod normalize;
pub mod poller;

pub use joystick::{default_api, AxisFlags, DeviceCaps, DriverError, JoyInfoEx, JoystickApi};
pub use normalize::{AxisNormalizer, AxisReading, AxisThresholds, NormalizedSample};
pub use poller::{AxisMap, DevicePoller, DeviceSelector, PollError, RawSample};
