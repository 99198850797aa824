//! Error type shared by every driver.

use alloc::string::String;

/// Errors surfaced by I2C drivers.
///
/// A device that does not answer a connectivity probe is not an error; probes
/// report it as `Ok(false)`. Everything here reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The driver has no open bus handle (native library missing, permission
    /// denied, or the open call failed).
    #[error("I2C bus is not connected")]
    NotConnected,

    /// The shared bus is held elsewhere; the driver never waits for it.
    #[error("I2C bus is locked by another user")]
    BusBusy,

    /// A previous holder of the host bus lock panicked.
    #[error("I2C bus lock is poisoned")]
    Poisoned,

    /// Address outside the 7-bit range.
    #[error("Invalid I2C address 0x{0:02x}")]
    InvalidAddress(u8),

    /// Invalid parameter or argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// No acknowledgment from device
    #[error("No acknowledgment from device at address 0x{0:02x}")]
    NoAck(u8),

    /// Transfer failure reported by an embedded-hal bus.
    #[cfg(feature = "mcu")]
    #[error("I2C transfer failed: {0:?}")]
    Transfer(embedded_hal::i2c::ErrorKind),

    /// No bus opener was installed for the named runtime.
    #[cfg(feature = "mcu")]
    #[error("No I2C bus opener installed for the {0} runtime")]
    NoBusOpener(&'static str),

    /// I/O error from the native bus library
    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same transaction could succeed.
    ///
    /// Only transport-level I/O failures qualify. Permission and
    /// configuration problems do not go away by asking again.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "std")]
            Error::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::InvalidInput
                    | std::io::ErrorKind::Unsupported
            ),
            _ => false,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
