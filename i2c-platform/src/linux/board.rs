//! Board identification for multi-bus Linux hosts.
//!
//! Single-board computers expose their header I2C pins on different
//! `/dev/i2c-N` buses. The device-tree model string tells us which board we
//! are on.

use std::{fs, io, path::Path};

use tracing::{debug, warn};

/// Board-identity descriptor exposed by the kernel.
pub const BOARD_MODEL_PATH: &str = "/proc/device-tree/model";

/// Bus used when the board is unknown or the descriptor is unreadable.
pub const DEFAULT_BUS_INDEX: u8 = 1;

/// How connectivity is probed on a given board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    /// Zero-length SMBus quick write.
    QuickWrite,
    /// One-byte raw read.
    ReadByte,
}

/// A known board and the header bus it exposes.
#[derive(Debug, Clone, Copy)]
pub struct BoardProfile {
    /// Substring of the device-tree model string.
    pub model_fragment: &'static str,
    /// `/dev/i2c-N` index of the header bus.
    pub bus_index: u8,
}

/// Known boards, first match wins.
pub const KNOWN_BOARDS: &[BoardProfile] = &[
    BoardProfile {
        model_fragment: "Raspberry Pi",
        bus_index: 1,
    },
    BoardProfile {
        model_fragment: "Jetson Orin Nano",
        bus_index: 7,
    },
];

/// Boards whose I2C controller rejects SMBus quick writes.
///
/// This is a list of platform exceptions, not general logic: the Tegra I2C
/// driver on Jetson modules does not implement the quick command, so probing
/// falls back to a one-byte read there.
pub const READ_BYTE_PROBE_BOARDS: &[&str] = &["Jetson"];

/// What we learned about the board from its identity descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardIdentity {
    /// Model string, if the descriptor could be read.
    pub model: Option<String>,
    /// Header bus index.
    pub bus_index: u8,
    /// Probe primitive that works on this board.
    pub probe: ProbeMethod,
}

impl BoardIdentity {
    /// Read the descriptor at [`BOARD_MODEL_PATH`].
    pub fn detect() -> Self {
        Self::from_path(Path::new(BOARD_MODEL_PATH))
    }

    /// Read the descriptor at `path`. Absence or read failure is not an error.
    pub fn from_path(path: &Path) -> Self {
        match read_model(path) {
            Ok(model) => Self::from_model(Some(&model)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    bus = DEFAULT_BUS_INDEX,
                    "Board identity unreadable, using default I2C bus"
                );
                Self::from_model(None)
            }
        }
    }

    /// Resolve the bus index and probe method from a model string.
    pub fn from_model(model: Option<&str>) -> Self {
        let Some(model) = model else {
            return Self {
                model: None,
                bus_index: DEFAULT_BUS_INDEX,
                probe: ProbeMethod::QuickWrite,
            };
        };

        let bus_index = match KNOWN_BOARDS
            .iter()
            .find(|board| model.contains(board.model_fragment))
        {
            Some(board) => {
                debug!(model = model, bus = board.bus_index, "Board identified");
                board.bus_index
            }
            None => {
                warn!(
                    model = model,
                    bus = DEFAULT_BUS_INDEX,
                    "Unknown board, using default I2C bus"
                );
                DEFAULT_BUS_INDEX
            }
        };

        let probe = if READ_BYTE_PROBE_BOARDS
            .iter()
            .any(|fragment| model.contains(fragment))
        {
            ProbeMethod::ReadByte
        } else {
            ProbeMethod::QuickWrite
        };

        Self {
            model: Some(model.to_string()),
            bus_index,
            probe,
        }
    }
}

// Device-tree strings are NUL-terminated.
fn read_model(path: &Path) -> io::Result<String> {
    let raw = fs::read(path)?;
    let text = String::from_utf8_lossy(&raw);
    Ok(text.trim_end_matches('\0').trim().to_string())
}
