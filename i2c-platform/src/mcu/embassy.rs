//! Embassy runtime driver. The bus is opened once, when the driver is built.

use alloc::sync::Arc;

use tracing::error;

use super::{installed_opener, BusOpener, BusSource, Connection, McuDriver, McuRuntime, SharedBus};
use crate::{config::DriverConfig, driver::I2cDriver, platform::HostInfo, registry::DriverDescriptor};

pub const NAME: &str = "Embassy I2C";

/// Registration order among platform drivers.
pub const ORDER: u32 = 10;

/// Connection opened at construction and never retried.
pub struct Eager {
    handle: Option<SharedBus>,
}

impl Eager {
    /// Open the bus now. A failure is logged and leaves the driver unconnected.
    pub fn open(source: &BusSource) -> Self {
        let handle = match source.open() {
            Ok(bus) => Some(bus),
            Err(e) => {
                error!(
                    runtime = source.runtime().identity(),
                    error = %e,
                    "Failed to open I2C bus"
                );
                None
            }
        };
        Self { handle }
    }
}

impl Connection for Eager {
    fn bus(&self) -> Option<SharedBus> {
        self.handle.clone()
    }

    fn connect(&self) -> bool {
        self.handle.is_some()
    }
}

pub type EmbassyDriver = McuDriver<Eager>;

impl McuDriver<Eager> {
    /// Open the bus through `opener` with the pin/clock settings in `config`.
    pub fn new(config: &DriverConfig, opener: Option<Arc<BusOpener>>) -> Self {
        let source = BusSource::new(McuRuntime::Embassy, config.mcu, opener);
        Self::from_connection(NAME, Eager::open(&source))
    }
}

pub fn is_embassy_runtime(host: &HostInfo) -> bool {
    host.runtime_is(McuRuntime::Embassy.identity())
}

fn create(config: Option<&DriverConfig>) -> Arc<dyn I2cDriver> {
    let config = config.cloned().unwrap_or_default();
    Arc::new(EmbassyDriver::new(
        &config,
        installed_opener(McuRuntime::Embassy),
    ))
}

inventory::submit! {
    DriverDescriptor {
        name: NAME,
        order: ORDER,
        is_platform: is_embassy_runtime,
        create,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::McuBusConfig;
    use crate::mcu::shared_bus;
    use crate::mcu::testing::FakeHal;

    #[test]
    fn test_opens_once_at_construction() {
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        let opener: Arc<BusOpener> = Arc::new(move |_: &McuBusConfig| -> crate::Result<SharedBus> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(shared_bus(FakeHal::with_devices(&[0x29])))
        });

        let driver = EmbassyDriver::new(&DriverConfig::default(), Some(opener));
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        assert!(driver.connect());
        assert!(driver.is_device_connected(0x29).unwrap());
        assert_eq!(driver.name(), NAME);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_open_is_not_retried() {
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        let opener: Arc<BusOpener> = Arc::new(move |_: &McuBusConfig| -> crate::Result<SharedBus> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(crate::Error::InvalidParameter("peripheral in use".into()))
        });

        let driver = EmbassyDriver::new(&DriverConfig::default(), Some(opener));
        assert!(!driver.connect());
        assert!(matches!(
            driver.read_byte(0x29, None),
            Err(crate::Error::NotConnected)
        ));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pins_and_frequency_passed_to_opener() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let record = Arc::clone(&seen);
        let opener: Arc<BusOpener> = Arc::new(move |cfg: &McuBusConfig| -> crate::Result<SharedBus> {
            *record.lock().unwrap() = Some(*cfg);
            Ok(shared_bus(FakeHal::default()))
        });

        let config = DriverConfig::default().with_pins(4, 5).with_frequency(400_000);
        let _driver = EmbassyDriver::new(&config, Some(opener));

        let cfg = seen.lock().unwrap().expect("opener called");
        assert_eq!(cfg.pins(), Some((4, 5)));
        assert_eq!(cfg.frequency_hz, 400_000);
    }

    #[test]
    fn test_runtime_predicate() {
        assert!(is_embassy_runtime(&HostInfo::new("none", Some("embassy"))));
        assert!(!is_embassy_runtime(&HostInfo::new("none", Some("rtic"))));
        assert!(!is_embassy_runtime(&HostInfo::new("linux", None)));
    }
}
