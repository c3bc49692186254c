//! # SBC Telemetry Collector
//!
//! Long-running sampler for a small single-board computer that lives next to
//! a solar charge controller. Every tick it reads the host (CPU temperature,
//! clock, utilization, RAM, optionally the firmware throttle flags) and the
//! EPsolar charge controller over Modbus RTU, publishes the combined sample as
//! JSON over MQTT, and cycles a two-line summary across a character LCD.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sbc_telemetry::display::ConsoleDisplay;
//! use sbc_telemetry::{ChargerLink, HostSensors, Monitor, MonitorConfig, MqttLink};
//!
//! # async fn run() {
//! let config = MonitorConfig::default();
//! let host = HostSensors::new(config.thermal_zone_path());
//! let charger = config.serial.clone().map(ChargerLink::new);
//! let broker = config.broker.clone().map(MqttLink::new);
//! let display = Some(ConsoleDisplay::new(config.display.columns));
//!
//! let mut monitor = Monitor::new(&config, host, charger, broker, display);
//! monitor.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await;
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`monitor`] - the sample & publish loop
//! - [`supervisor`] - lazy-reconnect wrapper around one external resource
//! - [`sensors`] - host queries and the charge controller register map
//! - [`broker`] - MQTT publishing link
//! - [`display`] - LCD driver and the page cycler
//! - [`telemetry`] - sample assembly, JSON layout and page text
//! - [`config`] - constants and the runtime configuration

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod broker;
pub mod config;
pub mod display;
pub mod monitor;
pub mod sensors;
pub mod supervisor;
pub mod telemetry;

// Re-export main public types for convenience
pub use broker::MqttLink;
pub use config::{ConfigError, MonitorConfig};
pub use display::{CharDisplay, PageCycler};
pub use monitor::{Monitor, MonitorState, TickReport};
pub use sensors::{ChargerLink, HostSensors, HostSource};
pub use supervisor::{ConnectionState, Link, LinkError, Supervisor};
pub use telemetry::Sample;
