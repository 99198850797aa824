//! What the current process is running on.
//!
//! Detection predicates look only at a [`HostInfo`] snapshot, so evaluating
//! them never touches a bus.

use alloc::string::{String, ToString};

use once_cell::sync::OnceCell;
use tracing::warn;

/// Environment variable consulted when no runtime identity was installed.
pub const RUNTIME_ENV: &str = "I2C_PLATFORM_RUNTIME";

/// OS identifier reported by firmware builds.
pub const BARE_METAL_OS: &str = "none";

// Backed by a critical section on firmware builds.
static RUNTIME_IDENTITY: OnceCell<&'static str> = OnceCell::new();

/// Snapshot of the facts platform predicates match against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// OS identifier, as in `std::env::consts::OS` (e.g. "linux"), or
    /// [`BARE_METAL_OS`] without `std`.
    pub os: String,
    /// Runtime identity for constrained runtimes (e.g. "embassy"), lowercase.
    pub runtime: Option<String>,
}

impl HostInfo {
    /// Describe the current process.
    pub fn detect() -> Self {
        let runtime = RUNTIME_IDENTITY
            .get()
            .map(|id| id.to_string())
            .or_else(runtime_from_env)
            .map(|id| id.trim().to_ascii_lowercase())
            .filter(|id| !id.is_empty());

        Self {
            os: host_os().to_string(),
            runtime,
        }
    }

    /// Build a snapshot by hand (tests, simulators).
    pub fn new(os: &str, runtime: Option<&str>) -> Self {
        Self {
            os: os.to_ascii_lowercase(),
            runtime: runtime.map(str::to_ascii_lowercase),
        }
    }

    /// Whether the runtime identity equals `identity` (case-insensitive).
    pub fn runtime_is(&self, identity: &str) -> bool {
        self.runtime
            .as_deref()
            .is_some_and(|id| id.eq_ignore_ascii_case(identity))
    }
}

#[cfg(feature = "std")]
fn host_os() -> &'static str {
    std::env::consts::OS
}

#[cfg(not(feature = "std"))]
fn host_os() -> &'static str {
    BARE_METAL_OS
}

#[cfg(feature = "std")]
fn runtime_from_env() -> Option<String> {
    std::env::var(RUNTIME_ENV).ok()
}

#[cfg(not(feature = "std"))]
fn runtime_from_env() -> Option<String> {
    None
}

/// Publish the runtime identity of this process. The first call wins.
#[cfg_attr(not(feature = "mcu"), allow(dead_code))]
pub(crate) fn set_runtime_identity(identity: &'static str) {
    if let Err(rejected) = RUNTIME_IDENTITY.set(identity) {
        if let Some(current) = RUNTIME_IDENTITY.get() {
            if *current != rejected {
                warn!(
                    current = current,
                    rejected = rejected,
                    "Runtime identity already set, ignoring"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_match_is_case_insensitive() {
        let host = HostInfo::new("none", Some("Embassy"));
        assert!(host.runtime_is("embassy"));
        assert!(host.runtime_is("EMBASSY"));
        assert!(!host.runtime_is("rtic"));

        let linux = HostInfo::new("linux", None);
        assert!(!linux.runtime_is("embassy"));
    }

    #[test]
    fn test_detect_reports_compile_target_os() {
        let host = HostInfo::detect();
        assert_eq!(host.os, host_os());
        #[cfg(feature = "std")]
        assert_eq!(host.os, std::env::consts::OS);
    }
}
