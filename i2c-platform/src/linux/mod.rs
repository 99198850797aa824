//! Linux host driver over `/dev/i2c-N`.
//!
//! The bus index comes from the caller or from the board identity. Every
//! read and write runs inside a bounded retry loop; connectivity probes run
//! once and turn any native failure into "not connected".

pub mod board;
pub mod smbus;

use std::{io, sync::Mutex, thread};

use tracing::{debug, error, trace, warn};

use crate::{
    config::{DriverConfig, RetryPolicy},
    driver::{check_address, register_frame, word_from_le, I2cDriver, SCAN_FIRST, SCAN_LAST},
    error::{Error, Result},
    platform::HostInfo,
};

use self::board::{BoardIdentity, ProbeMethod};
use self::smbus::{SmbusBus, SMBUS_BLOCK_MAX};

#[cfg(all(feature = "linux", target_os = "linux"))]
use self::smbus::I2cdevBus;

/// Name reported by the host driver.
pub const NAME: &str = "Linux I2C";

/// Registration order among platform drivers.
pub const ORDER: u32 = 0;

type Opener<B> = Box<dyn Fn(u8) -> io::Result<B> + Send + Sync>;

/// Whether `host` is a plain Linux process.
///
/// A process that announced a constrained runtime identity is not, even when
/// it happens to run on a Linux kernel (simulators, test rigs).
pub fn is_linux_host(host: &HostInfo) -> bool {
    host.os == "linux" && host.runtime.as_deref().map_or(true, |rt| rt == "linux")
}

/// Driver for a Linux I2C adapter.
pub struct LinuxDriver<B: SmbusBus> {
    bus: Mutex<Option<B>>,
    opener: Opener<B>,
    bus_index: u8,
    probe: ProbeMethod,
    retry: RetryPolicy,
}

#[cfg(all(feature = "linux", target_os = "linux"))]
impl LinuxDriver<I2cdevBus> {
    /// Identify the board and open its header bus through i2c-dev.
    pub fn open(config: &DriverConfig) -> Self {
        let board = BoardIdentity::detect();
        Self::with_opener(config, &board, I2cdevBus::open)
    }
}

impl<B: SmbusBus> LinuxDriver<B> {
    /// Build a driver whose native bus comes from `opener`.
    ///
    /// The bus is opened immediately. An explicit `config.bus_index` takes
    /// precedence over the one resolved from `board`.
    pub fn with_opener<F>(config: &DriverConfig, board: &BoardIdentity, opener: F) -> Self
    where
        F: Fn(u8) -> io::Result<B> + Send + Sync + 'static,
    {
        let bus_index = config.bus_index.unwrap_or(board.bus_index);
        let opener: Opener<B> = Box::new(opener);
        let bus = open_bus(&opener, bus_index);

        Self {
            bus: Mutex::new(bus),
            opener,
            bus_index,
            probe: board.probe,
            retry: config.retry,
        }
    }

    /// `/dev/i2c-N` index this driver talks to.
    pub fn bus_index(&self) -> u8 {
        self.bus_index
    }

    /// Primitive used by connectivity checks on this board.
    pub fn probe_method(&self) -> ProbeMethod {
        self.probe
    }

    /// Run `op` against the open bus, retrying transient failures.
    ///
    /// The error of the last attempt is returned unchanged.
    fn transact<T>(&self, address: u8, mut op: impl FnMut(&mut B) -> io::Result<T>) -> Result<T> {
        check_address(address)?;
        let mut guard = self.bus.lock().map_err(|_| Error::Poisoned)?;
        let bus = guard.as_mut().ok_or(Error::NotConnected)?;

        let attempts = self.retry.total_attempts();
        let mut attempt = 1;
        loop {
            match op(bus) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let err = Error::Io(e);
                    if attempt >= attempts || !err.is_transient() {
                        return Err(err);
                    }
                    trace!(
                        bus = self.bus_index,
                        address = format_args!("0x{:02x}", address),
                        attempt,
                        error = %err,
                        "I2C transfer failed, retrying"
                    );
                    if !self.retry.delay.is_zero() {
                        thread::sleep(self.retry.delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

fn open_bus<B>(opener: &Opener<B>, bus_index: u8) -> Option<B> {
    match opener(bus_index) {
        Ok(bus) => {
            debug!(bus = bus_index, "I2C bus opened");
            Some(bus)
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            error!(
                bus = bus_index,
                "Permission denied opening /dev/i2c-{}; add the user to the i2c group",
                bus_index
            );
            None
        }
        Err(e) => {
            error!(bus = bus_index, error = %e, "Failed to open I2C bus");
            None
        }
    }
}

impl<B: SmbusBus> I2cDriver for LinuxDriver<B> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&self) -> bool {
        let Ok(mut guard) = self.bus.lock() else {
            warn!(bus = self.bus_index, "I2C bus lock poisoned");
            return false;
        };
        if guard.is_none() {
            *guard = open_bus(&self.opener, self.bus_index);
        }
        guard.is_some()
    }

    fn read_word(&self, address: u8, register: Option<u8>) -> Result<u16> {
        match register {
            Some(reg) => self.transact(address, |bus| bus.read_word_data(address, reg)),
            None => self.transact(address, |bus| {
                let mut buf = [0u8; 2];
                bus.read(address, &mut buf)?;
                Ok(word_from_le(&buf))
            }),
        }
    }

    fn read_byte(&self, address: u8, register: Option<u8>) -> Result<u8> {
        match register {
            Some(reg) => self.transact(address, |bus| bus.read_byte_data(address, reg)),
            None => self.transact(address, |bus| {
                let mut buf = [0u8; 1];
                bus.read(address, &mut buf)?;
                Ok(buf[0])
            }),
        }
    }

    fn read_block(&self, address: u8, register: Option<u8>, len: usize) -> Result<Vec<u8>> {
        match register {
            Some(reg) if len <= SMBUS_BLOCK_MAX => self.transact(address, |bus| {
                // len fits in u8 here
                bus.read_i2c_block_data(address, reg, len as u8)
            }),
            Some(reg) => self.transact(address, |bus| {
                let mut buf = vec![0u8; len];
                bus.write_read(address, &[reg], &mut buf)?;
                Ok(buf)
            }),
            None => self.transact(address, |bus| {
                let mut buf = vec![0u8; len];
                bus.read(address, &mut buf)?;
                Ok(buf)
            }),
        }
    }

    fn write_command(&self, address: u8, command: u8) -> Result<()> {
        self.transact(address, |bus| bus.write_byte(address, command))
    }

    fn write_word(&self, address: u8, register: u8, value: u16) -> Result<()> {
        self.transact(address, |bus| bus.write_word_data(address, register, value))
    }

    fn write_byte(&self, address: u8, register: u8, value: u8) -> Result<()> {
        self.transact(address, |bus| bus.write_byte_data(address, register, value))
    }

    fn write_block(&self, address: u8, register: u8, data: &[u8]) -> Result<()> {
        if data.len() <= SMBUS_BLOCK_MAX {
            self.transact(address, |bus| bus.write_i2c_block_data(address, register, data))
        } else {
            let frame = register_frame(register, data);
            self.transact(address, |bus| bus.write(address, &frame))
        }
    }

    fn write_read_block(&self, address: u8, data: &[u8], len: usize) -> Result<Vec<u8>> {
        self.transact(address, |bus| {
            let mut buf = vec![0u8; len];
            bus.write_read(address, data, &mut buf)?;
            Ok(buf)
        })
    }

    fn is_device_connected(&self, address: u8) -> Result<bool> {
        check_address(address)?;
        let mut guard = self.bus.lock().map_err(|_| Error::Poisoned)?;
        let bus = guard.as_mut().ok_or(Error::NotConnected)?;

        let outcome = match self.probe {
            ProbeMethod::QuickWrite => bus.write_quick(address),
            ProbeMethod::ReadByte => bus.read_byte(address).map(|_| ()),
        };
        if let Err(e) = &outcome {
            trace!(
                address = format_args!("0x{:02x}", address),
                error = %e,
                "No response"
            );
        }
        Ok(outcome.is_ok())
    }

    fn scan(&self) -> Result<Vec<u8>> {
        let mut found = Vec::new();
        for address in SCAN_FIRST..=SCAN_LAST {
            if self.is_device_connected(address)? {
                found.push(address);
            }
        }
        debug!(bus = self.bus_index, count = found.len(), "Bus scan complete");
        Ok(found)
    }
}

#[cfg(all(feature = "linux", target_os = "linux"))]
mod registration {
    use std::sync::Arc;

    use super::{is_linux_host, LinuxDriver, NAME, ORDER};
    use crate::{config::DriverConfig, driver::I2cDriver, registry::DriverDescriptor};

    fn create(config: Option<&DriverConfig>) -> Arc<dyn I2cDriver> {
        let config = config.cloned().unwrap_or_default();
        Arc::new(LinuxDriver::open(&config))
    }

    inventory::submit! {
        DriverDescriptor {
            name: NAME,
            order: ORDER,
            is_platform: is_linux_host,
            create,
        }
    }
}
