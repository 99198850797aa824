//! Platform-independent access to the I2C bus.
//!
//! The crate picks the driver that matches the running process (a Linux
//! host or a supported microcontroller runtime) and exposes it through the
//! [`I2cDriver`] trait:
//!
//! ```no_run
//! let Some(driver) = i2c_platform::get_driver(None) else {
//!     return;
//! };
//! if driver.is_device_connected(0x48).unwrap_or(false) {
//!     let _raw = driver.read_word(0x48, Some(0x00));
//! }
//! ```
//!
//! Without the `std` feature the crate is `no_std` + `alloc`, for firmware
//! that installs an embassy or RTIC bus at start-up.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod config;
pub mod driver;
pub mod error;
pub mod platform;
pub mod registry;

#[cfg(feature = "std")]
pub mod linux;
#[cfg(feature = "mcu")]
pub mod mcu;

pub use config::{DriverConfig, McuBusConfig, RetryPolicy};
pub use driver::I2cDriver;
pub use error::{Error, Result};
pub use platform::HostInfo;
pub use registry::{get_driver, is_device_connected, DriverDescriptor, DriverRegistry};
