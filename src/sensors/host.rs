use super::throttle::{parse_throttled_output, ThrottleBit, ThrottleFlags};
use super::ReadError;
use crate::config::{IO_TIMEOUT_MS, VCGENCMD};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::System;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuReading {
    /// Degrees Celsius
    pub temperature: f32,
    pub speed_mhz: u32,
    pub utilization_percent: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RamReading {
    pub utilization_percent: f32,
}

/// Stateless queries against the host operating system.
///
/// Each call stands on its own; a failure only affects the section the
/// caller was assembling. Reads may shell out, so they are async and the
/// sample loop bounds each one with its I/O timeout.
#[allow(async_fn_in_trait)]
pub trait HostSource {
    async fn read_cpu(&mut self) -> Result<CpuReading, ReadError>;

    async fn read_ram(&mut self) -> Result<RamReading, ReadError>;

    async fn read_throttle_mask(&mut self) -> Result<u32, ReadError>;

    async fn read_throttle_flags(&mut self, table: &[ThrottleBit]) -> Result<ThrottleFlags, ReadError> {
        self.read_throttle_mask()
            .await
            .map(|mask| ThrottleFlags::decode(mask, table))
    }
}

/// Raspberry Pi host: sysfs thermal zone, `vcgencmd` and `sysinfo`.
pub struct HostSensors {
    sys: System,
    thermal_zone_path: String,
    vcgencmd: String,
    io_timeout: Duration,
}

impl HostSensors {
    pub fn new(thermal_zone_path: impl Into<String>) -> Self {
        let mut sys = System::new();
        // CPU usage is a delta between two refreshes; prime the first one
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        Self {
            sys,
            thermal_zone_path: thermal_zone_path.into(),
            vcgencmd: VCGENCMD.to_string(),
            io_timeout: Duration::from_millis(IO_TIMEOUT_MS),
        }
    }

    pub fn with_vcgencmd(mut self, path: impl Into<String>) -> Self {
        self.vcgencmd = path.into();
        self
    }

    /// Upper bound for one `vcgencmd` run or thermal zone read.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    async fn read_temperature(&self) -> Result<f32, ReadError> {
        let read = tokio::fs::read_to_string(&self.thermal_zone_path);
        let raw = match timeout(self.io_timeout, read).await {
            Ok(result) => result.map_err(|source| ReadError::File {
                path: self.thermal_zone_path.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ReadError::Timeout {
                    operation: self.thermal_zone_path.clone(),
                    after: self.io_timeout,
                })
            }
        };
        parse_millidegrees(&raw).ok_or(ReadError::Parse {
            what: "thermal zone",
            output: raw,
        })
    }

    async fn read_speed_mhz(&self) -> Result<u32, ReadError> {
        let output = run_command(&self.vcgencmd, &["measure_clock", "arm"], self.io_timeout).await?;
        parse_measure_clock(&output).ok_or(ReadError::Parse {
            what: "measure_clock",
            output,
        })
    }

    fn read_utilization(&mut self) -> f32 {
        self.sys.refresh_cpu_usage();
        let cpus = self.sys.cpus();
        if cpus.is_empty() {
            return 0.0;
        }
        cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cpus.len() as f32
    }
}

impl HostSource for HostSensors {
    async fn read_cpu(&mut self) -> Result<CpuReading, ReadError> {
        let temperature = self.read_temperature().await?;
        let speed_mhz = self.read_speed_mhz().await?;
        let utilization_percent = self.read_utilization();

        Ok(CpuReading {
            temperature,
            speed_mhz,
            utilization_percent,
        })
    }

    async fn read_ram(&mut self) -> Result<RamReading, ReadError> {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return Err(ReadError::Unavailable("total memory reported as zero"));
        }
        let available = self.sys.available_memory().min(total);

        Ok(RamReading {
            utilization_percent: ((total - available) as f64 / total as f64 * 100.0) as f32,
        })
    }

    async fn read_throttle_mask(&mut self) -> Result<u32, ReadError> {
        let output = run_command(&self.vcgencmd, &["get_throttled"], self.io_timeout).await?;
        parse_throttled_output(&output).ok_or(ReadError::Parse {
            what: "get_throttled",
            output,
        })
    }
}

/// Runs `program` to completion, killing it if it outlives `limit`.
async fn run_command(program: &str, args: &[&str], limit: Duration) -> Result<String, ReadError> {
    let command = format!("{} {}", program, args.join(" "));
    let child = Command::new(program).args(args).kill_on_drop(true).output();

    let output = match timeout(limit, child).await {
        Ok(result) => result.map_err(|source| ReadError::Command {
            command: command.clone(),
            source,
        })?,
        // Dropping the future kills the child
        Err(_) => {
            return Err(ReadError::Timeout {
                operation: command,
                after: limit,
            })
        }
    };

    if !output.status.success() {
        return Err(ReadError::CommandStatus {
            command,
            status: output.status,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    debug!("{} -> {}", command, stdout.trim());
    Ok(stdout)
}

/// `48312` (millidegrees) -> 48.312
pub fn parse_millidegrees(raw: &str) -> Option<f32> {
    raw.trim().parse::<i64>().ok().map(|m| m as f32 / 1000.0)
}

/// `frequency(48)=1500398464` -> 1500
pub fn parse_measure_clock(output: &str) -> Option<u32> {
    let (_, hz) = output.trim().split_once('=')?;
    let hz: u64 = hz.trim().parse().ok()?;
    Some((hz as f64 / 1_000_000.0).round() as u32)
}
