//! # Runtime Constants and Monitor Configuration
//!
//! Every tunable of the collector is a compile-time constant here. The
//! binary gathers them into a [`MonitorConfig`] and lets the command line
//! override individual fields; there is no configuration file.

use crate::sensors::throttle::{ThrottleBit, DEFAULT_THROTTLE_BITS};
use static_assertions::const_assert;
use std::time::Duration;
use thiserror::Error;

// Sampling cadence (original LCD monitor: 0.25 s data cycle, 4 s page cycle)
pub const TICK_INTERVAL_MS: u64 = 250;
pub const PAGE_SWITCH_INTERVAL_MS: u64 = 4000;

// HD44780 16x2 character display
pub const LCD_COLUMNS: usize = 16;
pub const LCD_ROWS: usize = 2;
pub const MAX_LCD_COLUMNS: usize = 40;
pub const MAX_PAGES: usize = 8;
pub const LCD_I2C_BUS: &str = "/dev/i2c-1";
pub const LCD_I2C_ADDRESS: u8 = 0x27;

// EPsolar Tracer charge controller on a USB/RS485 adapter
pub const SERIAL_DEVICE: &str = "/dev/ttyUSB0";
pub const SERIAL_BAUD_RATE: u32 = 115_200;
pub const CHARGER_SLAVE_ID: u8 = 1;

// MQTT broker
pub const BROKER_HOST: &str = "ubuntu-server";
pub const BROKER_PORT: u16 = 1883;
pub const BROKER_CLIENT_ID: &str = "sbc-telemetry";
pub const BROKER_TOPIC: &str = "sensors/battery";
pub const BROKER_KEEP_ALIVE_S: u64 = 30;

// Host sensors
pub const THERMAL_ZONE: u32 = 0;
pub const THERMAL_ZONE_BASE_PATH: &str = "/sys/class/thermal";
pub const VCGENCMD: &str = "vcgencmd";

// Upper bound for any single connect, register read or publish
pub const IO_TIMEOUT_MS: u64 = 1000;

const_assert!(TICK_INTERVAL_MS > 0);
const_assert!(PAGE_SWITCH_INTERVAL_MS >= TICK_INTERVAL_MS);
const_assert!(LCD_COLUMNS <= MAX_LCD_COLUMNS);
const_assert!(LCD_ROWS == 2);
const_assert!(IO_TIMEOUT_MS <= 10 * TICK_INTERVAL_MS);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tick interval must be greater than zero")]
    ZeroTickInterval,
    #[error("page switch interval ({page_ms} ms) is shorter than the tick interval ({tick_ms} ms)")]
    PageSwitchTooShort { tick_ms: u128, page_ms: u128 },
    #[error("display width {0} is outside 1..={MAX_LCD_COLUMNS}")]
    InvalidColumns(usize),
    #[error("broker topic must not be empty")]
    EmptyTopic,
    #[error("throttle bit {0} does not fit in a 32-bit mask")]
    ThrottleBitOutOfRange(u8),
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    pub slave_id: u8,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive: Duration,
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub columns: usize,
    pub i2c_bus: String,
    pub i2c_address: u8,
}

/// Everything the sample loop needs to know about its environment.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub tick_interval: Duration,
    pub page_switch_interval: Duration,
    pub io_timeout: Duration,
    /// Sleep only the remainder of the tick after the I/O it spent
    pub drift_compensation: bool,
    pub thermal_zone: u32,
    pub track_throttle: bool,
    pub throttle_bits: Vec<ThrottleBit>,
    /// `None` runs without a charge controller
    pub serial: Option<SerialConfig>,
    /// `None` is offline mode: nothing is published
    pub broker: Option<BrokerConfig>,
    pub display: DisplayConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
            page_switch_interval: Duration::from_millis(PAGE_SWITCH_INTERVAL_MS),
            io_timeout: Duration::from_millis(IO_TIMEOUT_MS),
            drift_compensation: true,
            thermal_zone: THERMAL_ZONE,
            track_throttle: false,
            throttle_bits: DEFAULT_THROTTLE_BITS.to_vec(),
            serial: Some(SerialConfig {
                device: SERIAL_DEVICE.to_string(),
                baud_rate: SERIAL_BAUD_RATE,
                slave_id: CHARGER_SLAVE_ID,
            }),
            broker: Some(BrokerConfig {
                host: BROKER_HOST.to_string(),
                port: BROKER_PORT,
                client_id: BROKER_CLIENT_ID.to_string(),
                topic: BROKER_TOPIC.to_string(),
                keep_alive: Duration::from_secs(BROKER_KEEP_ALIVE_S),
            }),
            display: DisplayConfig {
                columns: LCD_COLUMNS,
                i2c_bus: LCD_I2C_BUS.to_string(),
                i2c_address: LCD_I2C_ADDRESS,
            },
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.page_switch_interval < self.tick_interval {
            return Err(ConfigError::PageSwitchTooShort {
                tick_ms: self.tick_interval.as_millis(),
                page_ms: self.page_switch_interval.as_millis(),
            });
        }
        if self.display.columns == 0 || self.display.columns > MAX_LCD_COLUMNS {
            return Err(ConfigError::InvalidColumns(self.display.columns));
        }
        if let Some(broker) = &self.broker {
            if broker.topic.trim().is_empty() {
                return Err(ConfigError::EmptyTopic);
            }
        }
        if let Some(bit) = self.throttle_bits.iter().find(|b| b.bit >= 32) {
            return Err(ConfigError::ThrottleBitOutOfRange(bit.bit));
        }
        Ok(())
    }

    /// Fraction of a page the cursor moves per tick.
    pub fn page_step(&self) -> f64 {
        // Whole nanoseconds keep common ratios such as 1/16 exact
        self.tick_interval.as_nanos() as f64 / self.page_switch_interval.as_nanos() as f64
    }

    pub fn thermal_zone_path(&self) -> String {
        format!("{}/thermal_zone{}/temp", THERMAL_ZONE_BASE_PATH, self.thermal_zone)
    }
}
