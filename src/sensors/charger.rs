//! EPsolar Tracer charge controller over Modbus RTU.
//!
//! Every field is its own input-register transaction. A single failed
//! transaction fails the whole reading: half a set of electrical values is
//! worse than none for both the display and the broker.

use super::ReadError;
use crate::config::SerialConfig;
use crate::supervisor::{Link, LinkError};
use serde::{Deserialize, Serialize};
use tokio_modbus::client::{rtu, Context, Reader};
use tokio_modbus::Slave;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

/// One input register (or low/high register pair) and its fixed-point scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub address: u16,
    pub words: u16,
    pub divisor: u16,
}

impl Register {
    const fn single(address: u16, divisor: u16) -> Self {
        Self { address, words: 1, divisor }
    }

    const fn double(address: u16, divisor: u16) -> Self {
        Self { address, words: 2, divisor }
    }

    /// Low word first, as the Tracer lays out its 32-bit values.
    pub fn decode(&self, words: &[u16]) -> Result<f32, ReadError> {
        if words.len() < self.words as usize {
            return Err(ReadError::ShortResponse {
                address: self.address,
                got: words.len(),
                expected: self.words as usize,
            });
        }
        let raw = match self.words {
            1 => u32::from(words[0]),
            _ => u32::from(words[0]) | (u32::from(words[1]) << 16),
        };
        Ok(raw as f32 / f32::from(self.divisor))
    }
}

pub const PV_VOLTAGE: Register = Register::single(0x3100, 100);
pub const PV_CURRENT: Register = Register::single(0x3101, 100);
pub const PV_POWER: Register = Register::double(0x3102, 100);
pub const BATTERY_VOLTAGE: Register = Register::single(0x3104, 100);
pub const BATTERY_CURRENT: Register = Register::single(0x3105, 100);
pub const BATTERY_POWER: Register = Register::double(0x3106, 100);
pub const LOAD_VOLTAGE: Register = Register::single(0x310C, 100);
pub const LOAD_CURRENT: Register = Register::single(0x310D, 100);
pub const LOAD_POWER: Register = Register::double(0x310E, 100);
pub const BATTERY_SOC: Register = Register::single(0x311A, 1);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    #[serde(rename = "u")]
    pub voltage: f32,
    #[serde(rename = "i")]
    pub current: f32,
    #[serde(rename = "p")]
    pub power: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    #[serde(rename = "u")]
    pub voltage: f32,
    #[serde(rename = "i")]
    pub current: f32,
    #[serde(rename = "p")]
    pub power: f32,
    #[serde(rename = "soc")]
    pub state_of_charge: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargeControllerReading {
    pub pv: PowerReading,
    pub battery: BatteryReading,
    pub load: PowerReading,
}

/// Raw input-register access. Implemented by the Modbus client and by
/// test doubles.
#[allow(async_fn_in_trait)]
pub trait RegisterReader {
    async fn read_input_registers(&mut self, address: u16, count: u16)
        -> Result<Vec<u16>, ReadError>;
}

async fn read_register<R: RegisterReader>(reader: &mut R, register: Register) -> Result<f32, ReadError> {
    let words = reader
        .read_input_registers(register.address, register.words)
        .await?;
    register.decode(&words)
}

pub async fn read_charge_controller<R: RegisterReader>(
    reader: &mut R,
) -> Result<ChargeControllerReading, ReadError> {
    let pv = PowerReading {
        voltage: read_register(reader, PV_VOLTAGE).await?,
        current: read_register(reader, PV_CURRENT).await?,
        power: read_register(reader, PV_POWER).await?,
    };

    let battery = BatteryReading {
        voltage: read_register(reader, BATTERY_VOLTAGE).await?,
        current: read_register(reader, BATTERY_CURRENT).await?,
        power: read_register(reader, BATTERY_POWER).await?,
        state_of_charge: read_register(reader, BATTERY_SOC).await?,
    };

    let load = PowerReading {
        voltage: read_register(reader, LOAD_VOLTAGE).await?,
        current: read_register(reader, LOAD_CURRENT).await?,
        power: read_register(reader, LOAD_POWER).await?,
    };

    Ok(ChargeControllerReading { pv, battery, load })
}

/// An open Modbus RTU session on the serial port.
pub struct ModbusCharger {
    ctx: Context,
}

impl ModbusCharger {
    pub fn open(config: &SerialConfig) -> Result<Self, LinkError> {
        let port = tokio_serial::new(config.device.as_str(), config.baud_rate)
            .open_native_async()
            .map_err(|e| LinkError::ConnectionFailure(format!("{}: {}", config.device, e)))?;

        Ok(Self {
            ctx: rtu::attach_slave(port, Slave(config.slave_id)),
        })
    }
}

impl RegisterReader for ModbusCharger {
    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ReadError> {
        match self.ctx.read_input_registers(address, count).await {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(exception)) => Err(ReadError::Register {
                address,
                reason: format!("exception response {:?}", exception),
            }),
            Err(e) => Err(ReadError::Register {
                address,
                reason: e.to_string(),
            }),
        }
    }
}

/// Connection-supervised access to the charge controller.
///
/// Opening the serial port counts as connecting; the port is dropped on
/// close so the next connect starts from a fresh file descriptor.
pub struct ChargerLink {
    config: SerialConfig,
    charger: Option<ModbusCharger>,
}

impl ChargerLink {
    pub fn new(config: SerialConfig) -> Self {
        Self { config, charger: None }
    }
}

impl Link for ChargerLink {
    type Request = ();
    type Response = ChargeControllerReading;

    fn name(&self) -> &str {
        &self.config.device
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        self.charger = Some(ModbusCharger::open(&self.config)?);
        Ok(())
    }

    async fn call(&mut self, _request: ()) -> Result<ChargeControllerReading, LinkError> {
        let charger = self.charger.as_mut().ok_or(LinkError::NotConnected)?;
        Ok(read_charge_controller(charger).await?)
    }

    async fn close(&mut self) {
        if self.charger.take().is_some() {
            debug!("🔌 Closed serial port {}", self.config.device);
        }
    }
}
