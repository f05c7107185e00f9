use serde::{Deserialize, Serialize};

/// Start of an SML transport frame (escape sequence + version 1 marker)
pub const START_SEQUENCE: [u8; 8] = [0x1B, 0x1B, 0x1B, 0x1B, 0x01, 0x01, 0x01, 0x01];
/// End of an SML transport frame, the padding and CRC bytes that follow are not kept
pub const STOP_SEQUENCE: [u8; 5] = [0x1B, 0x1B, 0x1B, 0x1B, 0x1A];
/// List entry prefix followed by the first OBIS bytes `1-0:`
pub const RECORD_PREFIX: [u8; 4] = [0x77, 0x07, 0x01, 0x00];
/// Unit tag for watt hours (unit code 30)
pub const WATT_HOUR_UNIT: [u8; 2] = [0x62, 0x1E];

/// Records shorter than this can not carry an identifier and a value
pub const MIN_RECORD_LEN: usize = 12;

/// One decoded value of a telegram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// OBIS id in the short `C.D.E` form, e.g. `1.8.0`
    pub identifier: String,
    pub value: f64,
}

impl Reading {
    pub fn new(identifier: String, value: f64) -> Self {
        Self { identifier, value }
    }
}

/// Telegram layouts seen on different meter firmwares. Selected once in the
/// config, the decoder never guesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategy {
    /// Locate the `62 1E` unit tag and read the type-length byte behind the scaler
    #[default]
    UnitMarker,
    /// Older layout with a size code at offset 10 and the value at offset 11
    FixedOffset,
}

/// How the acquisition loop handles the serial connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Open once, reuse across cycles and reopen only after a failed cycle
    Persistent,
    /// Open and close the port inside every cycle
    PerCycle,
}

impl ConnectionMode {
    pub fn from_keepalive(keepalive: bool) -> Self {
        if keepalive {
            ConnectionMode::Persistent
        } else {
            ConnectionMode::PerCycle
        }
    }
}
