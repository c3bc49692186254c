//! # Sample assembly
//!
//! A [`Sample`] is the single message produced per tick. Sections whose read
//! failed this tick are absent, never carried over from an earlier tick, and
//! consumers must tolerate any combination of present sections.
//!
//! Serialized layout (all sections optional):
//!
//! ```json
//! {
//!   "cpu": {"temp": 48.3, "util": 12.5, "speed": 1500},
//!   "ram": {"util": 41.0},
//!   "pv": {"u": 18.3, "i": 1.25, "p": 22.9},
//!   "battery": {"u": 13.2, "i": 1.6, "p": 21.1, "soc": 87.0},
//!   "load": {"u": 13.2, "i": 0.45, "p": 5.9},
//!   "Under-voltage detected": false
//! }
//! ```

use crate::sensors::{
    BatteryReading, ChargeControllerReading, CpuReading, PowerReading, RamReading, ThrottleFlags,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CpuSection {
    pub temp: f32,
    pub util: f32,
    pub speed: u32,
}

impl From<CpuReading> for CpuSection {
    fn from(reading: CpuReading) -> Self {
        Self {
            temp: reading.temperature,
            util: reading.utilization_percent,
            speed: reading.speed_mhz,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RamSection {
    pub util: f32,
}

impl From<RamReading> for RamSection {
    fn from(reading: RamReading) -> Self {
        Self {
            util: reading.utilization_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Sample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram: Option<RamSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv: Option<PowerReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<BatteryReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<PowerReading>,
    #[serde(flatten)]
    pub throttle: Option<ThrottleFlags>,
}

/// Collects this tick's successful reads, then freezes them into a [`Sample`].
#[derive(Debug, Default)]
pub struct SampleBuilder {
    sample: Sample,
}

impl SampleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu(mut self, reading: Option<CpuReading>) -> Self {
        self.sample.cpu = reading.map(CpuSection::from);
        self
    }

    pub fn ram(mut self, reading: Option<RamReading>) -> Self {
        self.sample.ram = reading.map(RamSection::from);
        self
    }

    pub fn charge_controller(mut self, reading: Option<ChargeControllerReading>) -> Self {
        if let Some(reading) = reading {
            self.sample.pv = Some(reading.pv);
            self.sample.battery = Some(reading.battery);
            self.sample.load = Some(reading.load);
        }
        self
    }

    pub fn throttle(mut self, flags: Option<ThrottleFlags>) -> Self {
        self.sample.throttle = flags;
        self
    }

    pub fn build(self) -> Sample {
        self.sample
    }
}

impl Sample {
    pub fn has_charge_controller(&self) -> bool {
        self.pv.is_some() && self.battery.is_some() && self.load.is_some()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Display pages for this sample, in rotation order.
    ///
    /// `clock` is the wall-clock text shown on the first page (`HH:MM:SS`).
    pub fn display_pages(&self, clock: &str) -> Vec<(String, String)> {
        let mut pages = Vec::new();

        if let Some(cpu) = &self.cpu {
            pages.push((
                format!("{} C:{}%", clock, significant(cpu.util, 3)),
                format!("C: {}C {}MHz", significant(cpu.temp, 3), cpu.speed),
            ));
        }

        if let (Some(pv), Some(battery), Some(load)) = (&self.pv, &self.battery, &self.load) {
            pages.push((
                format!("P: {}A {}V", significant(pv.current, 3), significant(pv.voltage, 3)),
                format!("P: {}W", significant(pv.power, 3)),
            ));
            pages.push((
                format!(
                    "B: {}A {}V",
                    significant(battery.current, 3),
                    significant(battery.voltage, 3)
                ),
                format!(
                    "B: {}W {}%",
                    significant(battery.power, 3),
                    battery.state_of_charge.round()
                ),
            ));
            pages.push((
                format!("L: {}A {}V", significant(load.current, 3), significant(load.voltage, 3)),
                format!("L: {}W", significant(load.power, 3)),
            ));
        }

        if let Some(flags) = &self.throttle {
            let active: Vec<&str> = flags.active().map(|f| f.bit.code).collect();
            if !active.is_empty() {
                pages.push(("Throttled:".to_string(), active.join(" ")));
            }
        }

        pages
    }
}

/// Formats `value` with `digits` significant digits, dropping trailing zeros.
///
/// `18.34` -> `18.3`, `0.4567` -> `0.457`, `1234.6` -> `1235`, `0.0` -> `0`.
pub fn significant(value: f32, digits: usize) -> String {
    if !value.is_finite() {
        return "--".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let magnitude = f64::from(value.abs()).log10().floor() as i32;
    let decimals = (digits as i32 - 1 - magnitude).max(0) as usize;
    let text = format!("{:.*}", decimals, value);

    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}
