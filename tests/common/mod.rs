#![allow(dead_code)]

use sbc_telemetry::display::{CharDisplay, DisplayError};
use sbc_telemetry::sensors::{
    BatteryReading, ChargeControllerReading, CpuReading, HostSource, PowerReading, RamReading,
};
use sbc_telemetry::sensors::ReadError;
use sbc_telemetry::{Link, LinkError, Monitor, MonitorConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct FakeHost {
    pub cpu_fails: bool,
    /// `read_cpu` never completes
    pub cpu_hangs: bool,
    pub ram_fails: bool,
    pub throttle_mask: Option<u32>,
}

impl FakeHost {
    pub fn healthy() -> Self {
        Self {
            cpu_fails: false,
            cpu_hangs: false,
            ram_fails: false,
            throttle_mask: Some(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            cpu_fails: true,
            cpu_hangs: false,
            ram_fails: true,
            throttle_mask: None,
        }
    }
}

impl HostSource for FakeHost {
    async fn read_cpu(&mut self) -> Result<CpuReading, ReadError> {
        if self.cpu_hangs {
            std::future::pending::<()>().await;
        }
        if self.cpu_fails {
            return Err(ReadError::Unavailable("thermal zone missing"));
        }
        Ok(CpuReading {
            temperature: 48.3,
            speed_mhz: 1500,
            utilization_percent: 12.5,
        })
    }

    async fn read_ram(&mut self) -> Result<RamReading, ReadError> {
        if self.ram_fails {
            return Err(ReadError::Unavailable("meminfo missing"));
        }
        Ok(RamReading {
            utilization_percent: 41.0,
        })
    }

    async fn read_throttle_mask(&mut self) -> Result<u32, ReadError> {
        self.throttle_mask
            .ok_or(ReadError::Unavailable("vcgencmd missing"))
    }
}

/// Knobs and counters shared between a test and the fake link it handed
/// to the monitor.
#[derive(Debug, Default)]
pub struct LinkScript {
    pub connect_ok: bool,
    pub call_ok: bool,
    pub hang_connect: bool,
    pub hang_call: bool,
    pub connect_attempts: u32,
    pub calls: u32,
    pub closes: u32,
    pub published: Vec<String>,
}

pub type Script = Arc<Mutex<LinkScript>>;

pub fn script(connect_ok: bool, call_ok: bool) -> Script {
    Arc::new(Mutex::new(LinkScript {
        connect_ok,
        call_ok,
        ..LinkScript::default()
    }))
}

async fn scripted_connect(script: &Script) -> Result<(), LinkError> {
    let (ok, hang) = {
        let mut s = script.lock().unwrap();
        s.connect_attempts += 1;
        (s.connect_ok, s.hang_connect)
    };
    if hang {
        std::future::pending::<()>().await;
    }
    if ok {
        Ok(())
    } else {
        Err(LinkError::ConnectionFailure("refused".to_string()))
    }
}

async fn scripted_call(script: &Script) -> Result<(), LinkError> {
    let (ok, hang) = {
        let mut s = script.lock().unwrap();
        s.calls += 1;
        (s.call_ok, s.hang_call)
    };
    if hang {
        std::future::pending::<()>().await;
    }
    if ok {
        Ok(())
    } else {
        Err(LinkError::ReadFailure(ReadError::Register {
            address: 0x3100,
            reason: "no response".to_string(),
        }))
    }
}

pub fn charger_reading() -> ChargeControllerReading {
    ChargeControllerReading {
        pv: PowerReading { voltage: 18.34, current: 1.25, power: 22.92 },
        battery: BatteryReading { voltage: 13.22, current: 1.6, power: 21.15, state_of_charge: 87.0 },
        load: PowerReading { voltage: 13.2, current: 0.45, power: 5.94 },
    }
}

pub struct FakeCharger {
    pub script: Script,
}

impl Link for FakeCharger {
    type Request = ();
    type Response = ChargeControllerReading;

    fn name(&self) -> &str {
        "fake-charger"
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        scripted_connect(&self.script).await
    }

    async fn call(&mut self, _request: ()) -> Result<ChargeControllerReading, LinkError> {
        scripted_call(&self.script).await?;
        Ok(charger_reading())
    }

    async fn close(&mut self) {
        self.script.lock().unwrap().closes += 1;
    }
}

pub struct FakeBroker {
    pub script: Script,
}

impl Link for FakeBroker {
    type Request = String;
    type Response = ();

    fn name(&self) -> &str {
        "fake-broker"
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        scripted_connect(&self.script).await
    }

    async fn call(&mut self, payload: String) -> Result<(), LinkError> {
        scripted_call(&self.script)
            .await
            .map_err(|e| LinkError::PublishFailure(e.to_string()))?;
        self.script.lock().unwrap().published.push(payload);
        Ok(())
    }

    async fn close(&mut self) {
        self.script.lock().unwrap().closes += 1;
    }
}

#[derive(Default)]
pub struct RecordingDisplay {
    pub writes: Vec<(usize, String)>,
}

impl RecordingDisplay {
    /// The last page written, as two rows.
    pub fn last_page(&self) -> Option<(String, String)> {
        let n = self.writes.len();
        if n < 2 {
            return None;
        }
        Some((self.writes[n - 2].1.clone(), self.writes[n - 1].1.clone()))
    }
}

impl CharDisplay for RecordingDisplay {
    fn write_line(&mut self, row: usize, text: &str) -> Result<(), DisplayError> {
        if row > 1 {
            return Err(DisplayError::InvalidRow(row));
        }
        self.writes.push((row, text.to_string()));
        Ok(())
    }
}

pub type TestMonitor = Monitor<FakeHost, FakeCharger, FakeBroker, RecordingDisplay>;

pub fn fixed_clock() -> String {
    "12:34:56".to_string()
}

pub fn fast_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.tick_interval = Duration::from_millis(10);
    config.page_switch_interval = Duration::from_millis(160);
    config.io_timeout = Duration::from_millis(50);
    config
}

pub fn monitor(
    config: &MonitorConfig,
    host: FakeHost,
    charger: Option<&Script>,
    broker: Option<&Script>,
) -> TestMonitor {
    Monitor::new(
        config,
        host,
        charger.map(|script| FakeCharger { script: Arc::clone(script) }),
        broker.map(|script| FakeBroker { script: Arc::clone(script) }),
        Some(RecordingDisplay::default()),
    )
    .with_clock(fixed_clock)
}
