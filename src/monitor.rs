//! # Sample & Publish Loop
//!
//! One sequential tick body, repeated at a fixed cadence:
//!
//! 1. read host sensors (CPU, RAM, throttle flags when tracked)
//! 2. read the charge controller through its supervisor, or spend the tick
//!    on a reconnect attempt
//! 3. assemble the [`Sample`] from whatever succeeded
//! 4. log it
//! 5. publish it through the broker supervisor, or spend the tick on a
//!    reconnect attempt
//! 6. rebuild the display pages and render the current one, unless a
//!    charge controller connect result is being shown
//! 7. sleep out the rest of the tick
//!
//! Peripheral faults degrade the tick and never end the loop; only the
//! shutdown future does.

use crate::config::MonitorConfig;
use crate::display::{fit_line, CharDisplay, DisplayWriter, Page, PageCycler};
use crate::sensors::{ChargeControllerReading, HostSource, ReadError, ThrottleBit};
use crate::supervisor::{ConnectionState, Link, Supervisor};
use crate::telemetry::{Sample, SampleBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorState {
    pub running: bool,
    pub ticks: u64,
    pub samples_published: u64,
    pub charger_readings: u64,
    pub last_tick_us: u64,
}

/// What one tick produced, for callers that want to inspect it.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub sample: Sample,
    pub page: Page,
    pub published: bool,
    /// `page` is a connect result rather than sample data
    pub showing_status: bool,
    pub charger_state: Option<ConnectionState>,
    pub broker_state: Option<ConnectionState>,
}

pub struct Monitor<H, C, B, D>
where
    H: HostSource,
    C: Link<Request = (), Response = ChargeControllerReading>,
    B: Link<Request = String, Response = ()>,
    D: CharDisplay,
{
    host: H,
    charger: Option<Supervisor<C>>,
    broker: Option<Supervisor<B>>,
    cycler: PageCycler,
    display: DisplayWriter<D>,
    tick_interval: Duration,
    io_timeout: Duration,
    drift_compensation: bool,
    track_throttle: bool,
    throttle_bits: Vec<ThrottleBit>,
    clock: fn() -> String,
    status: Option<(Page, u32)>,
    status_ticks: u32,
    state: MonitorState,
}

fn local_clock() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

async fn degrade<T, F>(section: &'static str, limit: Duration, read: F) -> Option<T>
where
    F: Future<Output = Result<T, ReadError>>,
{
    let result = match timeout(limit, read).await {
        Ok(result) => result,
        Err(_) => Err(ReadError::Timeout {
            operation: format!("{} read", section),
            after: limit,
        }),
    };

    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(section = section, "Read failed: {}", e);
            None
        }
    }
}

impl<H, C, B, D> Monitor<H, C, B, D>
where
    H: HostSource,
    C: Link<Request = (), Response = ChargeControllerReading>,
    B: Link<Request = String, Response = ()>,
    D: CharDisplay,
{
    pub fn new(
        config: &MonitorConfig,
        host: H,
        charger: Option<C>,
        broker: Option<B>,
        display: Option<D>,
    ) -> Self {
        Self {
            host,
            charger: charger.map(|link| Supervisor::new(link, config.io_timeout)),
            broker: broker.map(|link| Supervisor::new(link, config.io_timeout)),
            cycler: PageCycler::new(config.page_step(), config.display.columns),
            display: DisplayWriter::new(display),
            tick_interval: config.tick_interval,
            io_timeout: config.io_timeout,
            drift_compensation: config.drift_compensation,
            track_throttle: config.track_throttle,
            throttle_bits: config.throttle_bits.clone(),
            clock: local_clock,
            status: None,
            // A connect result stays up for one page-switch interval
            status_ticks: (1.0 / config.page_step()).round().max(1.0) as u32,
            state: MonitorState::default(),
        }
    }

    /// Replaces the wall clock shown on the first display page.
    pub fn with_clock(mut self, clock: fn() -> String) -> Self {
        self.clock = clock;
        self
    }

    /// Initial connect attempt for every configured resource.
    pub async fn start(&mut self) {
        self.state.running = true;
        info!("🚀 Telemetry monitor starting (tick {:?})", self.tick_interval);

        if let Some(charger) = self.charger.as_mut() {
            let attempts = charger.stats().connect_attempts;
            charger.ensure_connected().await;
            self.note_charger_connect(attempts);
        }
        if let Some(broker) = self.broker.as_mut() {
            broker.ensure_connected().await;
        }
    }

    /// Releases the charge controller. The broker and display need no teardown.
    pub async fn stop(&mut self) {
        self.state.running = false;
        if let Some(charger) = self.charger.as_mut() {
            charger.shutdown().await;
        }
        info!("🛑 Telemetry monitor stopped after {} ticks", self.state.ticks);
    }

    pub async fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        self.state.ticks = self.state.ticks.saturating_add(1);

        // Host sensors are read every tick regardless of peripheral state
        let cpu = degrade("cpu", self.io_timeout, self.host.read_cpu()).await;
        let ram = degrade("ram", self.io_timeout, self.host.read_ram()).await;
        let throttle = if self.track_throttle {
            let read = self.host.read_throttle_flags(&self.throttle_bits);
            degrade("throttle", self.io_timeout, read).await
        } else {
            None
        };

        let charger_reading = match self.charger.as_mut() {
            Some(charger) => {
                let attempts = charger.stats().connect_attempts;
                let reading = charger.service(()).await;
                self.note_charger_connect(attempts);
                reading
            }
            None => None,
        };
        if charger_reading.is_some() {
            self.state.charger_readings = self.state.charger_readings.saturating_add(1);
        }

        let sample = SampleBuilder::new()
            .cpu(cpu)
            .ram(ram)
            .charge_controller(charger_reading)
            .throttle(throttle)
            .build();

        let payload = match sample.to_json() {
            Ok(json) => {
                info!(target: "sample", "📡 {}", json);
                Some(json)
            }
            Err(e) => {
                error!("Failed to serialize sample: {}", e);
                None
            }
        };

        let published = match (self.broker.as_mut(), payload) {
            (Some(broker), Some(payload)) => broker.service(payload).await.is_some(),
            _ => false,
        };
        if published {
            self.state.samples_published = self.state.samples_published.saturating_add(1);
        }

        let clock = (self.clock)();
        self.cycler.set_pages(sample.display_pages(&clock));
        // The cycler keeps its cadence while a connect result covers it
        let data_page = self.cycler.advance_and_render();
        let (page, showing_status) = match self.status.take() {
            Some((status, remaining)) => {
                if remaining > 1 {
                    self.status = Some((status.clone(), remaining - 1));
                }
                (status, true)
            }
            None => (data_page, false),
        };
        self.display.show(&page);

        self.state.last_tick_us = started.elapsed().as_micros() as u64;
        debug!(
            tick = self.state.ticks,
            elapsed_us = self.state.last_tick_us,
            page = self.cycler.current_index(),
            pages = self.cycler.page_count(),
            "tick complete"
        );

        TickReport {
            tick: self.state.ticks,
            sample,
            page,
            published,
            showing_status,
            charger_state: self.charger.as_ref().map(Supervisor::state),
            broker_state: self.broker.as_ref().map(Supervisor::state),
        }
    }

    /// Queues the connect result page if the charger supervisor just
    /// connected, or just began a streak of failed connects.
    fn note_charger_connect(&mut self, attempts_before: u32) {
        let Some(charger) = self.charger.as_ref() else {
            return;
        };
        let stats = charger.stats();
        if stats.connect_attempts == attempts_before {
            return;
        }

        let headline = if charger.is_connected() {
            "Connected to:"
        } else if stats.consecutive_failures == 1 {
            "Error connecting:"
        } else {
            return;
        };

        let columns = self.cycler.columns();
        let page = [fit_line(headline, columns), fit_line(charger.name(), columns)];
        self.status = Some((page, self.status_ticks));
    }

    /// Time to sleep after a tick that took `elapsed`.
    pub fn sleep_after(&self, elapsed: Duration) -> Duration {
        if self.drift_compensation {
            self.tick_interval.saturating_sub(elapsed)
        } else {
            self.tick_interval
        }
    }

    /// Ticks until `shutdown` resolves, then stops.
    pub async fn run_until<F>(&mut self, shutdown: F) -> &MonitorState
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if !self.state.running {
            self.start().await;
        }

        loop {
            let started = Instant::now();

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = self.tick() => {}
            }

            let pause = self.sleep_after(started.elapsed());
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = sleep(pause) => {}
            }
        }

        info!("⏹️  Shutdown requested");
        self.stop().await;
        &self.state
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn charger(&self) -> Option<&Supervisor<C>> {
        self.charger.as_ref()
    }

    pub fn broker(&self) -> Option<&Supervisor<B>> {
        self.broker.as_ref()
    }

    pub fn cycler(&self) -> &PageCycler {
        &self.cycler
    }

    pub fn display(&self) -> &DisplayWriter<D> {
        &self.display
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}
