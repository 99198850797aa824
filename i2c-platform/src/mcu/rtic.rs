//! RTIC runtime driver. The bus is opened on first access; a failed open is
//! attempted again on the next one.

use alloc::sync::Arc;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use tracing::{debug, error};

use super::{installed_opener, BusOpener, BusSource, Connection, McuDriver, McuRuntime, SharedBus};
use crate::{config::DriverConfig, driver::I2cDriver, platform::HostInfo, registry::DriverDescriptor};

pub const NAME: &str = "RTIC I2C";

/// Registration order among platform drivers.
pub const ORDER: u32 = 20;

/// Connection opened lazily behind an explicit accessor.
pub struct Lazy {
    source: BusSource,
    state: Mutex<CriticalSectionRawMutex, RefCell<LazyState>>,
}

#[derive(Default)]
struct LazyState {
    handle: Option<SharedBus>,
    failed_opens: u32,
}

impl Lazy {
    pub fn new(source: BusSource) -> Self {
        Self {
            source,
            state: Mutex::new(RefCell::new(LazyState::default())),
        }
    }
}

impl Connection for Lazy {
    /// The first failed open is logged as an error, repeats at debug.
    fn bus(&self) -> Option<SharedBus> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.handle.is_none() {
                match self.source.open() {
                    Ok(bus) => state.handle = Some(bus),
                    Err(e) => {
                        let runtime = self.source.runtime().identity();
                        if state.failed_opens == 0 {
                            error!(
                                runtime,
                                error = %e,
                                "Failed to open I2C bus, retrying on next access"
                            );
                        } else {
                            debug!(
                                runtime,
                                failed_opens = state.failed_opens + 1,
                                error = %e,
                                "I2C bus still unavailable"
                            );
                        }
                        state.failed_opens = state.failed_opens.saturating_add(1);
                    }
                }
            }
            state.handle.clone()
        })
    }

    fn connect(&self) -> bool {
        self.bus().is_some()
    }
}

pub type RticDriver = McuDriver<Lazy>;

impl McuDriver<Lazy> {
    /// Build the driver without touching the bus.
    pub fn new(config: &DriverConfig, opener: Option<Arc<BusOpener>>) -> Self {
        let source = BusSource::new(McuRuntime::Rtic, config.mcu, opener);
        Self::from_connection(NAME, Lazy::new(source))
    }
}

pub fn is_rtic_runtime(host: &HostInfo) -> bool {
    host.runtime_is(McuRuntime::Rtic.identity())
}

fn create(config: Option<&DriverConfig>) -> Arc<dyn I2cDriver> {
    let config = config.cloned().unwrap_or_default();
    Arc::new(RticDriver::new(&config, installed_opener(McuRuntime::Rtic)))
}

inventory::submit! {
    DriverDescriptor {
        name: NAME,
        order: ORDER,
        is_platform: is_rtic_runtime,
        create,
    }
}
