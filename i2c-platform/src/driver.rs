//! The capability interface every platform driver implements.
//!
//! Callers hold an `Arc<dyn I2cDriver>` and never need to know which runtime
//! they are on. All operations are blocking and take a 7-bit device address.

use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Lowest 7-bit address.
pub const ADDRESS_MIN: u8 = 0x00;
/// Highest 7-bit address.
pub const ADDRESS_MAX: u8 = 0x7F;
/// First address probed by a bus scan (0x00-0x07 are reserved).
pub const SCAN_FIRST: u8 = 0x08;
/// Last address probed by a bus scan (0x78-0x7F are reserved).
pub const SCAN_LAST: u8 = 0x77;

/// Uniform I2C driver surface.
///
/// There are no default bodies: an implementation that forgets an operation
/// does not compile.
pub trait I2cDriver: Send + Sync {
    /// Human-readable platform name.
    fn name(&self) -> &'static str;

    /// Open the bus if it is not open yet.
    ///
    /// Returns whether a bus handle is available. Never fails; open errors are
    /// logged and every later bus operation returns [`Error::NotConnected`].
    fn connect(&self) -> bool;

    /// Read a 16-bit word, low byte first.
    ///
    /// With `register == None` two raw bytes are read without a register
    /// select.
    fn read_word(&self, address: u8, register: Option<u8>) -> Result<u16>;

    /// Read one byte, from `register` when given.
    fn read_byte(&self, address: u8, register: Option<u8>) -> Result<u8>;

    /// Read `len` bytes, starting at `register` when given.
    fn read_block(&self, address: u8, register: Option<u8>, len: usize) -> Result<Vec<u8>>;

    /// Write a single command byte with no payload.
    fn write_command(&self, address: u8, command: u8) -> Result<()>;

    /// Write a 16-bit word to `register`, low byte first.
    fn write_word(&self, address: u8, register: u8, value: u16) -> Result<()>;

    /// Write one byte to `register`.
    fn write_byte(&self, address: u8, register: u8, value: u8) -> Result<()>;

    /// Write `data` starting at `register`.
    fn write_block(&self, address: u8, register: u8, data: &[u8]) -> Result<()>;

    /// Write `data` then read `len` bytes without releasing the bus between
    /// the two phases (repeated start).
    fn write_read_block(&self, address: u8, data: &[u8], len: usize) -> Result<Vec<u8>>;

    /// Check whether a device acknowledges `address`.
    ///
    /// A silent address is `Ok(false)`. Only failures unrelated to the device
    /// (bus not connected, bus busy) are returned as errors.
    fn is_device_connected(&self, address: u8) -> Result<bool>;

    /// Probe every address in `SCAN_FIRST..=SCAN_LAST` and return the ones
    /// that acknowledge, in ascending order.
    fn scan(&self) -> Result<Vec<u8>>;
}

/// Reject anything that does not fit in 7 bits.
pub fn check_address(address: u8) -> Result<()> {
    if address > ADDRESS_MAX {
        return Err(Error::InvalidAddress(address));
    }
    Ok(())
}

/// Assemble a word from the first two bytes of a little-endian read.
pub(crate) fn word_from_le(bytes: &[u8]) -> u16 {
    (u16::from(bytes[1]) << 8) | u16::from(bytes[0])
}

/// Prefix `data` with its register byte.
pub(crate) fn register_frame(register: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(data.len() + 1);
    frame.push(register);
    frame.extend_from_slice(data);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_address_bounds() {
        assert!(check_address(ADDRESS_MIN).is_ok());
        assert!(check_address(ADDRESS_MAX).is_ok());
        assert!(matches!(check_address(0x80), Err(Error::InvalidAddress(0x80))));
    }

    #[test]
    fn test_word_is_little_endian() {
        assert_eq!(word_from_le(&[0x34, 0x12]), 0x1234);
        assert_eq!(word_from_le(&[0xff, 0x00]), 0x00ff);
    }

    #[test]
    fn test_register_frame() {
        assert_eq!(register_frame(0x10, &[0xaa, 0xbb]), vec![0x10, 0xaa, 0xbb]);
        assert_eq!(register_frame(0x10, &[]), vec![0x10]);
    }
}
