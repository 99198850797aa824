//! Native Linux bus access.
//!
//! [`SmbusBus`] is the minimal contract the retry layer needs from the kernel
//! interface. [`I2cdevBus`] implements it over `/dev/i2c-N` with the
//! `i2cdev` crate; tests implement it with an in-memory fake.

use std::io;

/// SMBus-style primitives addressed per call.
///
/// Every method is a single native transaction and reports transport
/// failures as `io::Error` unchanged.
pub trait SmbusBus: Send {
    /// Zero-payload write that only checks for an acknowledgment.
    fn write_quick(&mut self, address: u8) -> io::Result<()>;

    /// Read one byte without a register select.
    fn read_byte(&mut self, address: u8) -> io::Result<u8>;

    /// Write one byte without a register select.
    fn write_byte(&mut self, address: u8, value: u8) -> io::Result<()>;

    fn read_byte_data(&mut self, address: u8, register: u8) -> io::Result<u8>;

    fn write_byte_data(&mut self, address: u8, register: u8, value: u8) -> io::Result<()>;

    /// Read a little-endian word from `register`.
    fn read_word_data(&mut self, address: u8, register: u8) -> io::Result<u16>;

    /// Write a little-endian word to `register`.
    fn write_word_data(&mut self, address: u8, register: u8, value: u16) -> io::Result<()>;

    /// I2C-block read of at most [`SMBUS_BLOCK_MAX`] bytes.
    fn read_i2c_block_data(&mut self, address: u8, register: u8, len: u8) -> io::Result<Vec<u8>>;

    /// I2C-block write of at most [`SMBUS_BLOCK_MAX`] bytes.
    fn write_i2c_block_data(&mut self, address: u8, register: u8, data: &[u8]) -> io::Result<()>;

    /// Plain read message with no register select.
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> io::Result<()>;

    /// Plain write message.
    fn write(&mut self, address: u8, data: &[u8]) -> io::Result<()>;

    /// Combined write then read with a repeated start.
    fn write_read(&mut self, address: u8, data: &[u8], buffer: &mut [u8]) -> io::Result<()>;
}

/// Largest SMBus I2C-block transfer.
pub const SMBUS_BLOCK_MAX: usize = 32;

#[cfg(all(feature = "linux", target_os = "linux"))]
pub use self::i2cdev_bus::I2cdevBus;

#[cfg(all(feature = "linux", target_os = "linux"))]
mod i2cdev_bus {
    use std::io;

    use i2cdev::core::{I2CDevice, I2CMessage, I2CTransfer};
    use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError, LinuxI2CMessage};
    use tracing::trace;

    use super::SmbusBus;

    /// `/dev/i2c-N` opened through the kernel i2c-dev interface.
    pub struct I2cdevBus {
        device: LinuxI2CDevice,
        current_address: u8,
    }

    impl I2cdevBus {
        /// Open `/dev/i2c-{bus_index}`.
        pub fn open(bus_index: u8) -> io::Result<Self> {
            let path = format!("/dev/i2c-{}", bus_index);
            let device = LinuxI2CDevice::new(&path, 0).map_err(io::Error::from)?;
            trace!(path = %path, "Opened I2C device node");
            Ok(Self {
                device,
                current_address: 0,
            })
        }

        // The kernel keeps one target address per file descriptor.
        fn select(&mut self, address: u8) -> io::Result<&mut LinuxI2CDevice> {
            if self.current_address != address {
                self.device
                    .set_slave_address(u16::from(address))
                    .map_err(io::Error::from)?;
                self.current_address = address;
            }
            Ok(&mut self.device)
        }
    }

    fn native(err: LinuxI2CError) -> io::Error {
        err.into()
    }

    impl SmbusBus for I2cdevBus {
        fn write_quick(&mut self, address: u8) -> io::Result<()> {
            self.select(address)?.smbus_write_quick(false).map_err(native)
        }

        fn read_byte(&mut self, address: u8) -> io::Result<u8> {
            self.select(address)?.smbus_read_byte().map_err(native)
        }

        fn write_byte(&mut self, address: u8, value: u8) -> io::Result<()> {
            self.select(address)?.smbus_write_byte(value).map_err(native)
        }

        fn read_byte_data(&mut self, address: u8, register: u8) -> io::Result<u8> {
            self.select(address)?
                .smbus_read_byte_data(register)
                .map_err(native)
        }

        fn write_byte_data(&mut self, address: u8, register: u8, value: u8) -> io::Result<()> {
            self.select(address)?
                .smbus_write_byte_data(register, value)
                .map_err(native)
        }

        fn read_word_data(&mut self, address: u8, register: u8) -> io::Result<u16> {
            self.select(address)?
                .smbus_read_word_data(register)
                .map_err(native)
        }

        fn write_word_data(&mut self, address: u8, register: u8, value: u16) -> io::Result<()> {
            self.select(address)?
                .smbus_write_word_data(register, value)
                .map_err(native)
        }

        fn read_i2c_block_data(
            &mut self,
            address: u8,
            register: u8,
            len: u8,
        ) -> io::Result<Vec<u8>> {
            self.select(address)?
                .smbus_read_i2c_block_data(register, len)
                .map_err(native)
        }

        fn write_i2c_block_data(
            &mut self,
            address: u8,
            register: u8,
            data: &[u8],
        ) -> io::Result<()> {
            self.select(address)?
                .smbus_write_i2c_block_data(register, data)
                .map_err(native)
        }

        fn read(&mut self, address: u8, buffer: &mut [u8]) -> io::Result<()> {
            self.select(address)?.read(buffer).map_err(native)
        }

        fn write(&mut self, address: u8, data: &[u8]) -> io::Result<()> {
            self.select(address)?.write(data).map_err(native)
        }

        fn write_read(&mut self, address: u8, data: &[u8], buffer: &mut [u8]) -> io::Result<()> {
            let device = self.select(address)?;
            if data.is_empty() {
                return device.read(buffer).map_err(native);
            }
            let mut messages = [LinuxI2CMessage::write(data), LinuxI2CMessage::read(buffer)];
            device.transfer(&mut messages).map_err(native)?;
            Ok(())
        }
    }
}
