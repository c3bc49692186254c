//! Decoding of the firmware's `get_throttled` bitmask.
//!
//! Bit layout (current condition / has occurred since boot):
//!
//! | Bit | Hex     | Meaning                             |
//! |-----|---------|-------------------------------------|
//! | 0   | 0x1     | Under-voltage detected              |
//! | 1   | 0x2     | Arm frequency capped                |
//! | 2   | 0x4     | Currently throttled                 |
//! | 3   | 0x8     | Soft temperature limit active       |
//! | 16  | 0x10000 | Under-voltage has occurred          |
//! | 17  | 0x20000 | Arm frequency capping has occurred  |
//! | 18  | 0x40000 | Throttling has occurred             |
//! | 19  | 0x80000 | Soft temperature limit has occurred |

use serde::ser::{Serialize, SerializeMap, Serializer};

/// One named bit of the throttle mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleBit {
    pub bit: u8,
    /// Key used in the published sample
    pub label: &'static str,
    /// Short form for the display page
    pub code: &'static str,
}

impl ThrottleBit {
    /// Bits below 16 describe the present state, the rest are sticky history.
    pub fn is_current(&self) -> bool {
        self.bit < 16
    }
}

pub const DEFAULT_THROTTLE_BITS: [ThrottleBit; 8] = [
    ThrottleBit { bit: 0, label: "Under-voltage detected", code: "UV" },
    ThrottleBit { bit: 1, label: "Arm frequency capped", code: "FC" },
    ThrottleBit { bit: 2, label: "Currently throttled", code: "TH" },
    ThrottleBit { bit: 3, label: "Soft temperature limit active", code: "SL" },
    ThrottleBit { bit: 16, label: "Under-voltage has occurred", code: "uv" },
    ThrottleBit { bit: 17, label: "Arm frequency capping has occurred", code: "fc" },
    ThrottleBit { bit: 18, label: "Throttling has occurred", code: "th" },
    ThrottleBit { bit: 19, label: "Soft temperature limit has occurred", code: "sl" },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleFlag {
    pub bit: ThrottleBit,
    pub set: bool,
}

/// Decoded flags, kept in table order.
///
/// Serializes as a flat `label -> bool` map so the flags can be merged into
/// the top level of a sample.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThrottleFlags {
    flags: Vec<ThrottleFlag>,
}

impl ThrottleFlags {
    pub fn decode(mask: u32, table: &[ThrottleBit]) -> Self {
        let flags = table
            .iter()
            .map(|bit| ThrottleFlag {
                bit: *bit,
                set: bit.bit < 32 && mask & (1u32 << bit.bit) != 0,
            })
            .collect();
        Self { flags }
    }

    pub fn get(&self, label: &str) -> Option<bool> {
        self.flags.iter().find(|f| f.bit.label == label).map(|f| f.set)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThrottleFlag> {
        self.flags.iter()
    }

    /// Conditions that are set right now (history bits excluded).
    pub fn active(&self) -> impl Iterator<Item = &ThrottleFlag> {
        self.flags.iter().filter(|f| f.set && f.bit.is_current())
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl Serialize for ThrottleFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.flags.len()))?;
        for flag in &self.flags {
            map.serialize_entry(flag.bit.label, &flag.set)?;
        }
        map.end()
    }
}

/// Parses `vcgencmd get_throttled` output, e.g. `throttled=0x50005`.
pub fn parse_throttled_output(output: &str) -> Option<u32> {
    let value = output.trim().strip_prefix("throttled=")?;
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
