use clap::{App, Arg, ArgMatches};
use colored::*;
use sbc_telemetry::config::{BROKER_PORT, BROKER_TOPIC, PAGE_SWITCH_INTERVAL_MS, TICK_INTERVAL_MS};
use sbc_telemetry::display::{CharDisplay, ConsoleDisplay};
use sbc_telemetry::{ChargerLink, HostSensors, Monitor, MonitorConfig, MqttLink};
use std::time::Duration;
use tracing::{info, warn, Level};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("sbc-telemetry")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("📟 Samples host and charge-controller sensors, shows them on the LCD and publishes them over MQTT")
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Increase log verbosity (-v info, -vv debug)"),
        )
        .arg(
            Arg::with_name("offline")
                .long("offline")
                .help("Do not connect to the MQTT broker"),
        )
        .arg(
            Arg::with_name("stdout")
                .long("stdout")
                .help("Draw the display pages on the terminal instead of the LCD"),
        )
        .arg(
            Arg::with_name("no-charger")
                .long("no-charger")
                .help("Run without a charge controller"),
        )
        .arg(
            Arg::with_name("throttle")
                .long("throttle")
                .help("Include the firmware throttle flags in every sample"),
        )
        .arg(
            Arg::with_name("broker-host")
                .long("broker-host")
                .value_name("HOST")
                .help("MQTT broker host")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("broker-port")
                .long("broker-port")
                .value_name("PORT")
                .help("MQTT broker port")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("topic")
                .long("topic")
                .value_name("TOPIC")
                .help("MQTT topic samples are published on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("serial-device")
                .long("serial-device")
                .value_name("PATH")
                .help("Serial device of the charge controller")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("thermal-zone")
                .long("thermal-zone")
                .value_name("N")
                .help("sysfs thermal zone holding the CPU temperature")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("tick-ms")
                .long("tick-ms")
                .value_name("MS")
                .help("Sampling interval in milliseconds")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("page-ms")
                .long("page-ms")
                .value_name("MS")
                .help("How long each display page stays up, in milliseconds")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            Arg::with_name("no-drift-compensation")
                .long("no-drift-compensation")
                .help("Sleep the full tick interval after every tick"),
        )
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = build_config(&matches)?;
    if let Err(e) = config.validate() {
        eprintln!("{} {}", "❌ Invalid configuration:".bright_red().bold(), e);
        std::process::exit(2);
    }

    println!("{}", "📟 SBC Telemetry Collector".bright_cyan().bold());
    println!("{}", "==========================".bright_cyan());
    print_config(&config);

    let host = HostSensors::new(config.thermal_zone_path()).with_io_timeout(config.io_timeout);
    let charger = config.serial.clone().map(ChargerLink::new);
    let broker = config.broker.clone().map(MqttLink::new);
    let display = open_display(&config, matches.is_present("stdout"));

    let mut monitor = Monitor::new(&config, host, charger, broker, display);
    let state = monitor
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    println!(
        "{} {} ticks, {} published, {} charge controller readings",
        "🛑 Stopped after".bright_yellow(),
        state.ticks.to_string().bright_white(),
        state.samples_published.to_string().bright_white(),
        state.charger_readings.to_string().bright_white()
    );

    Ok(())
}

fn is_number(value: String) -> Result<(), String> {
    value
        .parse::<u64>()
        .map(|_| ())
        .map_err(|_| format!("'{}' is not a valid number", value))
}

fn build_config(matches: &ArgMatches) -> Result<MonitorConfig, Box<dyn std::error::Error>> {
    let mut config = MonitorConfig::default();

    let tick_ms = matches.value_of("tick-ms").map_or(Ok(TICK_INTERVAL_MS), str::parse)?;
    let page_ms = matches
        .value_of("page-ms")
        .map_or(Ok(PAGE_SWITCH_INTERVAL_MS), str::parse)?;
    config.tick_interval = Duration::from_millis(tick_ms);
    config.page_switch_interval = Duration::from_millis(page_ms);
    config.drift_compensation = !matches.is_present("no-drift-compensation");
    config.track_throttle = matches.is_present("throttle");

    if let Some(zone) = matches.value_of("thermal-zone") {
        config.thermal_zone = zone.parse()?;
    }

    if matches.is_present("no-charger") {
        config.serial = None;
    } else if let (Some(serial), Some(device)) =
        (config.serial.as_mut(), matches.value_of("serial-device"))
    {
        serial.device = device.to_string();
    }

    if matches.is_present("offline") {
        config.broker = None;
    } else if let Some(broker) = config.broker.as_mut() {
        if let Some(host) = matches.value_of("broker-host") {
            broker.host = host.to_string();
        }
        broker.port = matches.value_of("broker-port").map_or(Ok(BROKER_PORT), str::parse)?;
        broker.topic = matches.value_of("topic").unwrap_or(BROKER_TOPIC).to_string();
    }

    Ok(config)
}

fn print_config(config: &MonitorConfig) {
    println!(
        "  {} {:?}, page every {:?}",
        "Tick:".bright_blue(),
        config.tick_interval,
        config.page_switch_interval
    );
    match &config.serial {
        Some(serial) => println!(
            "  {} {} @ {} baud, slave {}",
            "Charger:".bright_blue(),
            serial.device,
            serial.baud_rate,
            serial.slave_id
        ),
        None => println!("  {} {}", "Charger:".bright_blue(), "disabled".dimmed()),
    }
    match &config.broker {
        Some(broker) => println!(
            "  {} mqtt://{}:{}/{}",
            "Broker:".bright_blue(),
            broker.host,
            broker.port,
            broker.topic
        ),
        None => println!("  {} {}", "Broker:".bright_blue(), "offline".dimmed()),
    }
}

fn open_display(config: &MonitorConfig, stdout: bool) -> Option<Box<dyn CharDisplay>> {
    if stdout {
        return Some(Box::new(ConsoleDisplay::new(config.display.columns)));
    }
    open_lcd(config)
}

#[cfg(feature = "hardware")]
fn open_lcd(config: &MonitorConfig) -> Option<Box<dyn CharDisplay>> {
    use sbc_telemetry::display::lcd::open_linux_lcd;

    match open_linux_lcd(&config.display.i2c_bus, config.display.i2c_address, config.display.columns) {
        Ok(lcd) => {
            info!("🖥️  LCD ready on {} at {:#04x}", config.display.i2c_bus, config.display.i2c_address);
            Some(Box::new(lcd))
        }
        Err(e) => {
            warn!("LCD unavailable, running without a display: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "hardware"))]
fn open_lcd(_config: &MonitorConfig) -> Option<Box<dyn CharDisplay>> {
    info!("Built without the `hardware` feature; running without a display");
    None
}
