//! Platform driver registry and the process-wide default driver.
//!
//! Each driver module registers a [`DriverDescriptor`] with
//! `inventory::submit!`. Modules compiled out by cargo features never
//! register, so their platforms are silently absent.

use alloc::{sync::Arc, vec::Vec};

use once_cell::sync::OnceCell;
use tracing::{debug, error, warn};

use crate::{config::DriverConfig, driver::I2cDriver, platform::HostInfo};

/// Builds a driver, with explicit parameters or platform defaults.
pub type CreateFn = fn(Option<&DriverConfig>) -> Arc<dyn I2cDriver>;

/// Driver descriptor that gets collected by inventory.
pub struct DriverDescriptor {
    /// Human-readable driver name
    pub name: &'static str,
    /// Position in the candidate list; lower is tried first
    pub order: u32,
    /// Whether this driver targets the described process. Must not touch the bus.
    pub is_platform: fn(&HostInfo) -> bool,
    /// Factory for the driver
    pub create: CreateFn,
}

inventory::collect!(DriverDescriptor);

/// Ordered candidate drivers plus the cached default instance.
pub struct DriverRegistry {
    candidates: Vec<&'static DriverDescriptor>,
    default: OnceCell<Arc<dyn I2cDriver>>,
}

impl DriverRegistry {
    /// Collect every registered descriptor.
    pub fn discover() -> Self {
        Self::with_descriptors(inventory::iter::<DriverDescriptor>().collect())
    }

    /// Build a registry from an explicit candidate list.
    pub fn with_descriptors(mut candidates: Vec<&'static DriverDescriptor>) -> Self {
        candidates.sort_by_key(|desc| desc.order);
        debug!(
            drivers = ?candidates.iter().map(|d| d.name).collect::<Vec<_>>(),
            "I2C driver registry ready"
        );
        Self {
            candidates,
            default: OnceCell::new(),
        }
    }

    /// Names of the candidate drivers, in selection order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.candidates.iter().map(|desc| desc.name)
    }

    /// First candidate whose predicate matches `host`.
    pub fn find_descriptor(&self, host: &HostInfo) -> Option<&'static DriverDescriptor> {
        self.candidates
            .iter()
            .copied()
            .find(|desc| (desc.is_platform)(host))
    }

    /// Get a driver for `host`.
    ///
    /// Without `config` the cached default is returned, creating it on first
    /// use. With `config` a fresh driver is built and the cache is left
    /// alone. `None` means no registered driver supports this platform.
    ///
    /// Concurrent first calls build the default exactly once; the others
    /// block until it is ready.
    pub fn select(
        &self,
        host: &HostInfo,
        config: Option<&DriverConfig>,
    ) -> Option<Arc<dyn I2cDriver>> {
        if config.is_none() {
            if let Some(driver) = self.default.get() {
                return Some(Arc::clone(driver));
            }
        }

        let Some(desc) = self.find_descriptor(host) else {
            debug!(os = %host.os, runtime = ?host.runtime, "No I2C driver matches platform");
            return None;
        };

        if config.is_some() {
            debug!(driver = desc.name, "Creating I2C driver with explicit config");
            return Some((desc.create)(config));
        }

        let driver = self.default.get_or_init(|| {
            debug!(driver = desc.name, "Creating default I2C driver");
            (desc.create)(None)
        });
        Some(Arc::clone(driver))
    }

    /// The cached default driver, if one was created.
    pub fn cached_default(&self) -> Option<Arc<dyn I2cDriver>> {
        self.default.get().cloned()
    }
}

static REGISTRY: OnceCell<DriverRegistry> = OnceCell::new();

/// The process-wide registry.
pub fn registry() -> &'static DriverRegistry {
    REGISTRY.get_or_init(DriverRegistry::discover)
}

/// Get the driver for the current process.
///
/// Passing `None` returns the same instance on every call.
pub fn get_driver(config: Option<&DriverConfig>) -> Option<Arc<dyn I2cDriver>> {
    registry().select(&HostInfo::detect(), config)
}

/// Whether a device acknowledges `address` on the current platform's bus.
///
/// Never fails: a missing driver or an unusable bus is logged and reported
/// as `false`.
pub fn is_device_connected(address: u8, config: Option<&DriverConfig>) -> bool {
    let Some(driver) = get_driver(config) else {
        error!(
            address = format_args!("0x{:02x}", address),
            "No I2C driver available for this platform"
        );
        return false;
    };
    match driver.is_device_connected(address) {
        Ok(connected) => connected,
        Err(e) => {
            warn!(
                driver = driver.name(),
                address = format_args!("0x{:02x}", address),
                error = %e,
                "Connectivity probe failed"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Barrier,
    };
    use std::thread;
    use std::time::Duration;

    struct StubDriver(&'static str);

    impl I2cDriver for StubDriver {
        fn name(&self) -> &'static str {
            self.0
        }
        fn connect(&self) -> bool {
            true
        }
        fn read_word(&self, _: u8, _: Option<u8>) -> Result<u16> {
            Ok(0)
        }
        fn read_byte(&self, _: u8, _: Option<u8>) -> Result<u8> {
            Ok(0)
        }
        fn read_block(&self, _: u8, _: Option<u8>, len: usize) -> Result<Vec<u8>> {
            Ok(vec![0; len])
        }
        fn write_command(&self, _: u8, _: u8) -> Result<()> {
            Ok(())
        }
        fn write_word(&self, _: u8, _: u8, _: u16) -> Result<()> {
            Ok(())
        }
        fn write_byte(&self, _: u8, _: u8, _: u8) -> Result<()> {
            Ok(())
        }
        fn write_block(&self, _: u8, _: u8, _: &[u8]) -> Result<()> {
            Ok(())
        }
        fn write_read_block(&self, _: u8, _: &[u8], len: usize) -> Result<Vec<u8>> {
            Ok(vec![0; len])
        }
        fn is_device_connected(&self, address: u8) -> Result<bool> {
            Ok(address == 0x42)
        }
        fn scan(&self) -> Result<Vec<u8>> {
            Ok(vec![0x42])
        }
    }

    fn any_host(_: &HostInfo) -> bool {
        true
    }

    fn linux_only(host: &HostInfo) -> bool {
        host.os == "linux"
    }

    fn create_first(_: Option<&DriverConfig>) -> Arc<dyn I2cDriver> {
        Arc::new(StubDriver("first"))
    }

    fn create_second(_: Option<&DriverConfig>) -> Arc<dyn I2cDriver> {
        Arc::new(StubDriver("second"))
    }

    fn create_linux(_: Option<&DriverConfig>) -> Arc<dyn I2cDriver> {
        Arc::new(StubDriver("linux"))
    }

    static SLOW_CREATES: AtomicUsize = AtomicUsize::new(0);

    fn create_slow(_: Option<&DriverConfig>) -> Arc<dyn I2cDriver> {
        SLOW_CREATES.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        Arc::new(StubDriver("slow"))
    }

    static SLOW: DriverDescriptor = DriverDescriptor {
        name: "slow",
        order: 0,
        is_platform: any_host,
        create: create_slow,
    };

    static FIRST: DriverDescriptor = DriverDescriptor {
        name: "first",
        order: 1,
        is_platform: any_host,
        create: create_first,
    };

    static SECOND: DriverDescriptor = DriverDescriptor {
        name: "second",
        order: 2,
        is_platform: any_host,
        create: create_second,
    };

    static LINUX: DriverDescriptor = DriverDescriptor {
        name: "linux",
        order: 0,
        is_platform: linux_only,
        create: create_linux,
    };

    #[test]
    fn test_first_match_in_order_wins() {
        let registry = DriverRegistry::with_descriptors(vec![&SECOND, &FIRST, &LINUX]);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["linux", "first", "second"]);

        let host = HostInfo::new("none", Some("embassy"));
        let driver = registry.select(&host, None).unwrap();
        assert_eq!(driver.name(), "first");

        let host = HostInfo::new("linux", None);
        let desc = registry.find_descriptor(&host).unwrap();
        assert_eq!(desc.name, "linux");
    }

    #[test]
    fn test_no_match_returns_none_and_caches_nothing() {
        let registry = DriverRegistry::with_descriptors(vec![&LINUX]);
        let host = HostInfo::new("macos", None);

        assert!(registry.select(&host, None).is_none());
        assert!(registry.select(&host, Some(&DriverConfig::default())).is_none());
        assert!(registry.cached_default().is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = DriverRegistry::with_descriptors(Vec::new());
        assert!(registry.select(&HostInfo::new("linux", None), None).is_none());
    }

    #[test]
    fn test_default_cached_per_registry() {
        let host = HostInfo::new("linux", None);
        let a = DriverRegistry::with_descriptors(vec![&LINUX]);
        let b = DriverRegistry::with_descriptors(vec![&LINUX]);

        let from_a = a.select(&host, None).unwrap();
        let from_b = b.select(&host, None).unwrap();

        assert!(Arc::ptr_eq(&from_a, &a.select(&host, None).unwrap()));
        assert!(!Arc::ptr_eq(&from_a, &from_b));
    }

    #[test]
    fn test_concurrent_first_use_creates_default_once() {
        let registry = DriverRegistry::with_descriptors(vec![&SLOW]);
        let host = HostInfo::new("linux", None);
        let barrier = Barrier::new(4);
        let (registry, host, barrier) = (&registry, &host, &barrier);

        let drivers: Vec<Arc<dyn I2cDriver>> = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(move || {
                        barrier.wait();
                        registry.select(host, None).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(SLOW_CREATES.load(Ordering::SeqCst), 1);
        for driver in &drivers[1..] {
            assert!(Arc::ptr_eq(&drivers[0], driver));
        }
        assert!(Arc::ptr_eq(&drivers[0], &registry.cached_default().unwrap()));
    }

    #[test]
    fn test_discover_sorted_by_order() {
        let registry = DriverRegistry::discover();
        let orders: Vec<u32> = registry.candidates.iter().map(|d| d.order).collect();
        let mut sorted = orders.clone();
        sorted.sort_unstable();
        assert_eq!(orders, sorted);

        #[cfg(feature = "mcu")]
        {
            let names: Vec<_> = registry.names().collect();
            assert!(names.contains(&crate::mcu::embassy::NAME));
            assert!(names.contains(&crate::mcu::rtic::NAME));
        }
        #[cfg(all(feature = "linux", target_os = "linux"))]
        assert_eq!(registry.names().next(), Some(crate::linux::NAME));
    }
}
