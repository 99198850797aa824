//! Driver construction parameters.
//!
//! Passing a [`DriverConfig`] to the selector always builds a fresh driver;
//! omitting it returns the cached process-wide default.

use alloc::format;
use core::time::Duration;

use crate::error::{Error, Result};

/// Default bus frequency for constrained runtimes (standard mode).
pub const DEFAULT_FREQUENCY_HZ: u32 = 100_000;

/// Default number of attempts for a host-side transaction.
pub const DEFAULT_RETRY_ATTEMPTS: u8 = 3;

const MAX_RETRY_ATTEMPTS: u8 = 10;

/// Bounded retry for transient transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub attempts: u8,
    /// Pause between attempts. Zero retries immediately.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn total_attempts(&self) -> u8 {
        self.attempts.max(1)
    }
}

/// Pin and clock settings for buses opened by a constrained runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McuBusConfig {
    /// SDA pin number. The board default is used when either pin is unset.
    pub sda: Option<u8>,
    /// SCL pin number.
    pub scl: Option<u8>,
    /// Bus frequency in Hz.
    pub frequency_hz: u32,
}

impl Default for McuBusConfig {
    fn default() -> Self {
        Self {
            sda: None,
            scl: None,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
        }
    }
}

impl McuBusConfig {
    /// Both pins, when both were given.
    pub fn pins(&self) -> Option<(u8, u8)> {
        self.sda.zip(self.scl)
    }

    /// Controller index for pin-paired controllers.
    ///
    /// On RP2-family chips the two I2C controllers alternate every pin pair,
    /// so the controller is `(pin / 2) % 2`. SDA and SCL must land on the
    /// same one. Returns `Ok(None)` when the board default pins are used.
    pub fn paired_controller(&self) -> Result<Option<u8>> {
        let Some((sda, scl)) = self.pins() else {
            return Ok(None);
        };
        let sda_id = (sda / 2) % 2;
        let scl_id = (scl / 2) % 2;
        if sda_id != scl_id {
            return Err(Error::InvalidParameter(format!(
                "SDA pin {} and SCL pin {} are on different I2C controllers",
                sda, scl
            )));
        }
        Ok(Some(scl_id))
    }
}

/// Explicit driver construction parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverConfig {
    /// Host bus index (`/dev/i2c-N`). Resolved from the board when unset.
    pub bus_index: Option<u8>,
    /// Pin/clock settings for constrained runtimes.
    pub mcu: McuBusConfig,
    /// Retry policy for host-side transactions.
    pub retry: RetryPolicy,
}

impl DriverConfig {
    pub fn with_bus_index(mut self, bus_index: u8) -> Self {
        self.bus_index = Some(bus_index);
        self
    }

    pub fn with_pins(mut self, sda: u8, scl: u8) -> Self {
        self.mcu.sda = Some(sda);
        self.mcu.scl = Some(scl);
        self
    }

    pub fn with_frequency(mut self, frequency_hz: u32) -> Self {
        self.mcu.frequency_hz = frequency_hz;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Parse configuration from environment variables.
    ///
    /// Returns `None` when none of the variables are set, so callers fall
    /// back to the cached default driver.
    ///
    /// # Environment Variables
    ///
    /// - `I2C_PLATFORM_BUS`: host bus index
    /// - `I2C_PLATFORM_RETRIES`: total attempts (clamped to 1-10)
    /// - `I2C_PLATFORM_RETRY_DELAY_MS`: pause between attempts
    /// - `I2C_PLATFORM_SDA`, `I2C_PLATFORM_SCL`: pin numbers
    /// - `I2C_PLATFORM_FREQ_HZ`: bus frequency
    #[cfg(feature = "std")]
    pub fn from_env() -> Option<Self> {
        let bus_index = env_parse::<u8>("I2C_PLATFORM_BUS");
        let attempts = env_parse::<u8>("I2C_PLATFORM_RETRIES");
        let delay_ms = env_parse::<u64>("I2C_PLATFORM_RETRY_DELAY_MS");
        let sda = env_parse::<u8>("I2C_PLATFORM_SDA");
        let scl = env_parse::<u8>("I2C_PLATFORM_SCL");
        let frequency_hz = env_parse::<u32>("I2C_PLATFORM_FREQ_HZ");

        if bus_index.is_none()
            && attempts.is_none()
            && delay_ms.is_none()
            && sda.is_none()
            && scl.is_none()
            && frequency_hz.is_none()
        {
            return None;
        }

        let defaults = RetryPolicy::default();
        Some(Self {
            bus_index,
            mcu: McuBusConfig {
                sda,
                scl,
                frequency_hz: frequency_hz.unwrap_or(DEFAULT_FREQUENCY_HZ),
            },
            retry: RetryPolicy {
                attempts: attempts
                    .unwrap_or(defaults.attempts)
                    .clamp(1, MAX_RETRY_ATTEMPTS),
                delay: delay_ms.map(Duration::from_millis).unwrap_or(defaults.delay),
            },
        })
    }
}

#[cfg(feature = "std")]
fn env_parse<T: core::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
