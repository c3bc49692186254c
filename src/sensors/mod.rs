//! Sensor sources: the host itself and the serial charge controller.

pub mod charger;
pub mod host;
pub mod throttle;

pub use charger::{
    read_charge_controller, BatteryReading, ChargeControllerReading, ChargerLink, ModbusCharger,
    PowerReading, Register, RegisterReader,
};
pub use host::{CpuReading, HostSensors, HostSource, RamReading};
pub use throttle::{ThrottleBit, ThrottleFlags, DEFAULT_THROTTLE_BITS};

use thiserror::Error;

/// A sensor or register read that produced no usable value.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to run `{command}`: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    CommandStatus { command: String, status: std::process::ExitStatus },
    #[error("cannot read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected {what} output: {output:?}")]
    Parse { what: &'static str, output: String },
    #[error("register {address:#06x} transaction failed: {reason}")]
    Register { address: u16, reason: String },
    #[error("register {address:#06x} returned {got} words, expected {expected}")]
    ShortResponse { address: u16, got: usize, expected: usize },
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: std::time::Duration },
    #[error("no sensor data available: {0}")]
    Unavailable(&'static str),
}
