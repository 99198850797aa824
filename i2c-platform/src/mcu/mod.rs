//! Drivers for constrained microcontroller runtimes.
//!
//! The firmware owns the I2C peripheral and hands it to this crate through a
//! [`BusOpener`] installed with [`install_runtime`]. The bus is held as a
//! [`SharedBus`] so application code can keep using the same peripheral; every
//! driver operation takes it with `try_lock` and fails with
//! [`Error::BusBusy`] instead of waiting.
//!
//! Locks are embassy-sync mutexes over `critical-section`, so the firmware
//! must link a critical-section implementation (for example
//! `cortex-m/critical-section-single-core`).

pub mod embassy;
pub mod rtic;

use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex as BlockingMutex};
use embassy_sync::mutex::Mutex;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use tracing::{debug, trace};

use crate::{
    config::McuBusConfig,
    driver::{check_address, register_frame, word_from_le, I2cDriver, SCAN_FIRST, SCAN_LAST},
    error::{Error, Result},
    platform,
};

/// Object-safe view of an embedded-hal I2C bus.
pub trait NativeBus: Send {
    fn write(&mut self, address: u8, data: &[u8]) -> Result<()>;
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()>;
    fn write_read(&mut self, address: u8, data: &[u8], buffer: &mut [u8]) -> Result<()>;
}

impl<T> NativeBus for T
where
    T: I2c + Send,
{
    fn write(&mut self, address: u8, data: &[u8]) -> Result<()> {
        I2c::write(self, address, data).map_err(|e| transfer_error(address, e.kind()))
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        I2c::read(self, address, buffer).map_err(|e| transfer_error(address, e.kind()))
    }

    fn write_read(&mut self, address: u8, data: &[u8], buffer: &mut [u8]) -> Result<()> {
        I2c::write_read(self, address, data, buffer)
            .map_err(|e| transfer_error(address, e.kind()))
    }
}

fn transfer_error(address: u8, kind: ErrorKind) -> Error {
    match kind {
        ErrorKind::NoAcknowledge(_) => Error::NoAck(address),
        kind => Error::Transfer(kind),
    }
}

/// A bus shared between firmware code and a driver.
///
/// Firmware tasks may `lock().await` it; drivers only ever `try_lock`.
pub type SharedBus = Arc<Mutex<CriticalSectionRawMutex, Box<dyn NativeBus>>>;

/// Wrap an embedded-hal bus so it can be shared with a driver.
pub fn shared_bus<B>(bus: B) -> SharedBus
where
    B: I2c + Send + 'static,
{
    let bus: Box<dyn NativeBus> = Box::new(bus);
    Arc::new(Mutex::new(bus))
}

/// Opens the runtime's I2C peripheral for a given pin/clock configuration.
pub type BusOpener = dyn Fn(&McuBusConfig) -> Result<SharedBus> + Send + Sync;

/// Constrained runtimes with a driver in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuRuntime {
    /// Bus opened when the driver is built.
    Embassy,
    /// Bus opened on first use.
    Rtic,
}

impl McuRuntime {
    /// Identity string matched by platform detection.
    pub fn identity(self) -> &'static str {
        match self {
            McuRuntime::Embassy => "embassy",
            McuRuntime::Rtic => "rtic",
        }
    }
}

type OpenerTable = Vec<(McuRuntime, Arc<BusOpener>)>;

static OPENERS: BlockingMutex<CriticalSectionRawMutex, RefCell<OpenerTable>> =
    BlockingMutex::new(RefCell::new(Vec::new()));

/// Announce that this process runs on `runtime` and install its bus opener.
///
/// Call this from firmware start-up before asking for a driver. Installing a
/// second opener for the same runtime replaces the first.
pub fn install_runtime<F>(runtime: McuRuntime, opener: F)
where
    F: Fn(&McuBusConfig) -> Result<SharedBus> + Send + Sync + 'static,
{
    let opener: Arc<BusOpener> = Arc::new(opener);
    OPENERS.lock(|openers| {
        let mut openers = openers.borrow_mut();
        openers.retain(|(rt, _)| *rt != runtime);
        openers.push((runtime, opener));
    });

    platform::set_runtime_identity(runtime.identity());
    debug!(runtime = runtime.identity(), "Runtime bus opener installed");
}

/// Opener installed for `runtime`, if any.
pub(crate) fn installed_opener(runtime: McuRuntime) -> Option<Arc<BusOpener>> {
    OPENERS.lock(|openers| {
        openers
            .borrow()
            .iter()
            .find(|(rt, _)| *rt == runtime)
            .map(|(_, opener)| Arc::clone(opener))
    })
}

/// Everything needed to open the bus, kept until the open succeeds.
pub struct BusSource {
    runtime: McuRuntime,
    config: McuBusConfig,
    opener: Option<Arc<BusOpener>>,
}

impl BusSource {
    pub fn new(runtime: McuRuntime, config: McuBusConfig, opener: Option<Arc<BusOpener>>) -> Self {
        Self {
            runtime,
            config,
            opener,
        }
    }

    /// Runtime whose opener this source uses.
    pub fn runtime(&self) -> McuRuntime {
        self.runtime
    }

    /// Open the bus. Split-controller pins are rejected before the opener runs.
    pub fn open(&self) -> Result<SharedBus> {
        let runtime = self.runtime.identity();
        let opener = self.opener.as_ref().ok_or(Error::NoBusOpener(runtime))?;
        self.config.paired_controller()?;

        let bus = opener(&self.config)?;
        debug!(
            runtime,
            sda = ?self.config.sda,
            scl = ?self.config.scl,
            frequency_hz = self.config.frequency_hz,
            "I2C bus opened"
        );
        Ok(bus)
    }
}

/// When a driver opens its bus.
pub trait Connection: Send + Sync {
    /// The bus handle, opening it first if this policy allows.
    fn bus(&self) -> Option<SharedBus>;

    /// Whether a handle is available, opening it if this policy allows.
    fn connect(&self) -> bool;
}

/// Driver over a [`SharedBus`], parameterized by its connection policy.
pub struct McuDriver<C: Connection> {
    name: &'static str,
    conn: C,
}

impl<C: Connection> McuDriver<C> {
    pub(crate) fn from_connection(name: &'static str, conn: C) -> Self {
        Self { name, conn }
    }

    /// Run `op` with the bus locked.
    ///
    /// The guard is released when this returns, whatever `op` did, including
    /// when it unwinds.
    fn with_bus<T>(&self, address: u8, op: impl FnOnce(&mut dyn NativeBus) -> Result<T>) -> Result<T> {
        check_address(address)?;
        let bus = self.conn.bus().ok_or(Error::NotConnected)?;
        let Ok(mut guard) = bus.try_lock() else {
            return Err(Error::BusBusy);
        };
        op(&mut **guard)
    }
}

impl<C: Connection> I2cDriver for McuDriver<C> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn connect(&self) -> bool {
        self.conn.connect()
    }

    fn read_word(&self, address: u8, register: Option<u8>) -> Result<u16> {
        let bytes = self.read_block(address, register, 2)?;
        Ok(word_from_le(&bytes))
    }

    fn read_byte(&self, address: u8, register: Option<u8>) -> Result<u8> {
        let bytes = self.read_block(address, register, 1)?;
        Ok(bytes[0])
    }

    fn read_block(&self, address: u8, register: Option<u8>, len: usize) -> Result<Vec<u8>> {
        self.with_bus(address, |bus| {
            let mut buf = vec![0u8; len];
            match register {
                Some(reg) => bus.write_read(address, &[reg], &mut buf)?,
                None => bus.read(address, &mut buf)?,
            }
            Ok(buf)
        })
    }

    fn write_command(&self, address: u8, command: u8) -> Result<()> {
        self.with_bus(address, |bus| bus.write(address, &[command]))
    }

    fn write_word(&self, address: u8, register: u8, value: u16) -> Result<()> {
        let frame = register_frame(register, &value.to_le_bytes());
        self.with_bus(address, |bus| bus.write(address, &frame))
    }

    fn write_byte(&self, address: u8, register: u8, value: u8) -> Result<()> {
        self.with_bus(address, |bus| bus.write(address, &[register, value]))
    }

    fn write_block(&self, address: u8, register: u8, data: &[u8]) -> Result<()> {
        let frame = register_frame(register, data);
        self.with_bus(address, |bus| bus.write(address, &frame))
    }

    fn write_read_block(&self, address: u8, data: &[u8], len: usize) -> Result<Vec<u8>> {
        self.with_bus(address, |bus| {
            let mut buf = vec![0u8; len];
            if data.is_empty() {
                bus.read(address, &mut buf)?;
            } else {
                bus.write_read(address, data, &mut buf)?;
            }
            Ok(buf)
        })
    }

    fn is_device_connected(&self, address: u8) -> Result<bool> {
        self.with_bus(address, |bus| {
            // Some controllers reject zero-length writes
            if bus.write(address, &[]).is_ok() {
                return Ok(true);
            }
            let mut probe = [0u8; 1];
            let found = bus.read(address, &mut probe).is_ok();
            if !found {
                trace!(address = format_args!("0x{:02x}", address), "No response");
            }
            Ok(found)
        })
    }

    fn scan(&self) -> Result<Vec<u8>> {
        let mut found = Vec::new();
        for address in SCAN_FIRST..=SCAN_LAST {
            if self.is_device_connected(address)? {
                found.push(address);
            }
        }
        debug!(runtime = self.name, count = found.len(), "Bus scan complete");
        Ok(found)
    }
}


#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, Ordering};

    use embedded_hal::i2c::ErrorKind;

    use super::embassy::Eager;
    use super::testing::{opener_for, FakeHal};
    use super::*;

    fn driver_on(bus: &SharedBus) -> McuDriver<Eager> {
        let opener = opener_for(bus);
        let source = BusSource::new(McuRuntime::Embassy, McuBusConfig::default(), Some(opener));
        McuDriver::from_connection("test", Eager::open(&source))
    }

    #[test]
    fn test_contended_lock_fails_before_transfer() {
        let fake = FakeHal::with_devices(&[0x48]);
        let bus = shared_bus(fake.clone());
        let driver = driver_on(&bus);

        let held = bus.try_lock().unwrap();
        assert!(matches!(driver.read_byte(0x48, Some(0)), Err(Error::BusBusy)));
        assert!(matches!(driver.write_byte(0x48, 0, 1), Err(Error::BusBusy)));
        assert!(matches!(driver.is_device_connected(0x48), Err(Error::BusBusy)));
        drop(held);

        assert_eq!(fake.state().transfers, 0);
        assert!(driver.is_device_connected(0x48).unwrap());
    }

    #[test]
    fn test_lock_released_after_failed_transfer() {
        let fake = FakeHal::with_devices(&[0x48]);
        let bus = shared_bus(fake.clone());
        let driver = driver_on(&bus);

        fake.state().fail_next = Some(ErrorKind::Bus);
        assert!(matches!(
            driver.read_block(0x48, Some(0x10), 4),
            Err(Error::Transfer(ErrorKind::Bus))
        ));
        assert!(bus.try_lock().is_ok());

        assert!(matches!(driver.read_byte(0x30, None), Err(Error::NoAck(0x30))));
        assert!(bus.try_lock().is_ok());

        assert_eq!(driver.read_block(0x48, Some(0x10), 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_panic_mid_transfer_releases_lock() {
        let fake = FakeHal::with_devices(&[0x48]);
        let bus = shared_bus(fake.clone());
        let driver = driver_on(&bus);

        fake.state().panic_next = true;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| driver.read_byte(0x48, None)));
        assert!(outcome.is_err());

        assert!(bus.try_lock().is_ok());
        assert_eq!(driver.read_byte(0x48, None).unwrap(), 0);
    }

    #[test]
    fn test_register_and_raw_reads() {
        let fake = FakeHal::with_devices(&[0x40]);
        let bus = shared_bus(fake.clone());
        let driver = driver_on(&bus);

        driver.write_word(0x40, 0x02, 0x1234).unwrap();
        assert_eq!(fake.state().writes.last(), Some(&vec![0x02, 0x34, 0x12]));
        assert_eq!(driver.read_word(0x40, Some(0x02)).unwrap(), 0x1234);

        driver.write_byte(0x40, 0x00, 0x7e).unwrap();
        let raw_word = driver.read_word(0x40, None).unwrap();
        let raw_block = driver.read_block(0x40, None, 2).unwrap();
        assert_eq!(raw_word, (u16::from(raw_block[1]) << 8) | u16::from(raw_block[0]));
        assert_eq!(driver.read_byte(0x40, None).unwrap(), 0x7e);

        driver.write_command(0x40, 0x06).unwrap();
        assert_eq!(fake.state().writes.last(), Some(&vec![0x06]));
    }

    #[test]
    fn test_probe_falls_back_to_read() {
        let fake = FakeHal::with_devices(&[0x48]);
        fake.state().reject_zero_length = true;
        let bus = shared_bus(fake.clone());
        let driver = driver_on(&bus);

        assert!(driver.is_device_connected(0x48).unwrap());
        assert_eq!(fake.state().transfers, 2);

        assert!(!driver.is_device_connected(0x49).unwrap());
        assert_eq!(fake.state().transfers, 4);
    }

    #[test]
    fn test_scan_ascending() {
        let fake = FakeHal::with_devices(&[0x68, 0x08, 0x3c, 0x00, 0x78]);
        let driver = driver_on(&shared_bus(fake));

        assert_eq!(driver.scan().unwrap(), vec![0x08, 0x3c, 0x68]);
    }

    #[test]
    fn test_missing_opener_leaves_driver_unconnected() {
        let source = BusSource::new(McuRuntime::Embassy, McuBusConfig::default(), None);
        let driver = McuDriver::from_connection("test", Eager::open(&source));

        assert!(!driver.connect());
        assert!(matches!(driver.read_byte(0x48, None), Err(Error::NotConnected)));
        assert!(matches!(driver.is_device_connected(0x48), Err(Error::NotConnected)));
    }

    #[test]
    fn test_split_controller_pins_never_reach_opener() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let opener: Arc<BusOpener> = Arc::new(move |_: &McuBusConfig| -> Result<SharedBus> {
            flag.store(true, Ordering::SeqCst);
            Ok(shared_bus(FakeHal::default()))
        });
        let config = McuBusConfig {
            sda: Some(4),
            scl: Some(7),
            ..McuBusConfig::default()
        };

        let source = BusSource::new(McuRuntime::Embassy, config, Some(opener));
        assert!(matches!(source.open(), Err(Error::InvalidParameter(_))));
        assert!(!called.load(Ordering::SeqCst));
    }
}
