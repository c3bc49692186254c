mod common;

use common::*;
use sbc_telemetry::{ConnectionState, HostSensors, Monitor};
use std::time::Duration;

#[tokio::test]
async fn test_host_only_tick() {
    let config = fast_config();
    let mut monitor = monitor(&config, FakeHost::healthy(), None, None);

    let report = monitor.tick().await;

    assert_eq!(report.tick, 1);
    assert!(report.sample.cpu.is_some());
    assert!(report.sample.ram.is_some());
    assert!(report.sample.pv.is_none());
    assert!(report.sample.throttle.is_none());
    assert!(!report.published);
    assert_eq!(report.charger_state, None);
    assert_eq!(report.broker_state, None);

    // One page: clock and CPU
    assert_eq!(monitor.cycler().page_count(), 1);
    assert_eq!(report.page[0].as_str(), "12:34:56 C:12.5%");
    assert_eq!(report.page[1].as_str(), "C: 48.3C 1500MHz");

    let display = monitor.display().device().unwrap();
    assert_eq!(display.writes.len(), 2);
    assert_eq!(display.writes[0].0, 0);
    assert_eq!(display.writes[1].0, 1);
}

#[tokio::test]
async fn test_every_section_failing_still_renders_two_lines() {
    let config = fast_config();
    let mut monitor = monitor(&config, FakeHost::broken(), None, None);

    let report = monitor.tick().await;

    assert_eq!(report.sample.to_json().unwrap(), "{}");
    assert_eq!(monitor.cycler().page_count(), 0);
    for line in &report.page {
        assert_eq!(line.len(), config.display.columns);
        assert!(line.trim().is_empty());
    }

    let (first, second) = monitor.display().device().unwrap().last_page().unwrap();
    assert_eq!(first.len(), 16);
    assert_eq!(second.len(), 16);
}

#[tokio::test]
async fn test_disconnected_charger_one_attempt_per_tick() {
    let config = fast_config();
    let charger = script(false, true);
    let mut monitor = monitor(&config, FakeHost::healthy(), Some(&charger), None);

    for _ in 0..5 {
        let report = monitor.tick().await;
        assert!(report.sample.pv.is_none());
        assert!(report.sample.battery.is_none());
        assert!(report.sample.load.is_none());
        assert!(report.sample.cpu.is_some());
        assert_eq!(report.charger_state, Some(ConnectionState::Disconnected));
    }

    let s = charger.lock().unwrap();
    assert_eq!(s.connect_attempts, 5);
    assert_eq!(s.calls, 0);

    let stats = monitor.charger().unwrap().stats();
    assert_eq!(stats.connect_attempts, 5);
    assert_eq!(stats.consecutive_failures, 5);
}

#[tokio::test]
async fn test_charger_section_appears_the_tick_after_reconnect() {
    let config = fast_config();
    let charger = script(false, true);
    let mut monitor = monitor(&config, FakeHost::healthy(), Some(&charger), None);

    let report = monitor.tick().await;
    assert!(!report.sample.has_charge_controller());

    charger.lock().unwrap().connect_ok = true;

    // Reconnect tick: the connection comes up but no read is made
    let report = monitor.tick().await;
    assert_eq!(report.charger_state, Some(ConnectionState::Connected));
    assert!(!report.sample.has_charge_controller());

    let report = monitor.tick().await;
    assert!(report.sample.has_charge_controller());
    assert_eq!(report.sample.battery.unwrap().state_of_charge, 87.0);
    assert_eq!(monitor.cycler().page_count(), 4);
    assert_eq!(monitor.state().charger_readings, 1);
    assert_eq!(monitor.charger().unwrap().stats().consecutive_failures, 0);
}

#[tokio::test]
async fn test_read_failure_drops_connection() {
    let config = fast_config();
    let charger = script(true, false);
    let mut monitor = monitor(&config, FakeHost::healthy(), Some(&charger), None);

    monitor.tick().await;
    let report = monitor.tick().await;

    assert!(!report.sample.has_charge_controller());
    assert_eq!(report.charger_state, Some(ConnectionState::Disconnected));
    {
        let s = charger.lock().unwrap();
        assert_eq!(s.calls, 1);
        assert_eq!(s.closes, 1);
    }

    // Next tick spends itself on a reconnect, not another read
    monitor.tick().await;
    let s = charger.lock().unwrap();
    assert_eq!(s.connect_attempts, 2);
    assert_eq!(s.calls, 1);
}

#[tokio::test]
async fn test_hung_charger_is_bounded_by_io_timeout() {
    let config = fast_config();
    let charger = script(true, true);
    let mut monitor = monitor(&config, FakeHost::healthy(), Some(&charger), None);

    monitor.tick().await;
    charger.lock().unwrap().hang_call = true;

    let report = tokio::time::timeout(Duration::from_secs(2), monitor.tick())
        .await
        .expect("tick must not hang on the charger");

    assert!(report.sample.cpu.is_some());
    assert!(!report.sample.has_charge_controller());
    assert_eq!(report.charger_state, Some(ConnectionState::Disconnected));
}

#[tokio::test]
async fn test_publish_failure_does_not_stop_sampling() {
    let config = fast_config();
    let broker = script(true, false);
    let mut monitor = monitor(&config, FakeHost::healthy(), None, Some(&broker));

    // Tick 1 connects, tick 2 fails to publish
    assert!(!monitor.tick().await.published);
    let report = monitor.tick().await;
    assert!(!report.published);
    assert_eq!(report.broker_state, Some(ConnectionState::Disconnected));
    assert!(report.sample.cpu.is_some());

    broker.lock().unwrap().call_ok = true;

    // Tick 3 reconnects, tick 4 publishes
    assert!(!monitor.tick().await.published);
    let report = monitor.tick().await;
    assert!(report.published);
    assert_eq!(report.tick, 4);
    assert_eq!(monitor.state().samples_published, 1);
    assert_eq!(broker.lock().unwrap().published.len(), 1);
}

#[tokio::test]
async fn test_published_payload_is_sample_json() {
    let config = fast_config();
    let charger = script(true, true);
    let broker = script(true, true);
    let mut monitor = monitor(&config, FakeHost::healthy(), Some(&charger), Some(&broker));

    monitor.start().await;
    let report = monitor.tick().await;
    assert!(report.published);

    let payload = broker.lock().unwrap().published[0].clone();
    let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(value["cpu"]["speed"], 1500);
    assert_eq!(value["ram"]["util"], 41.0);
    assert_eq!(value["battery"]["soc"], 87.0);
    assert!(value["pv"]["u"].is_number());
    assert!(value["load"]["p"].is_number());
    assert_eq!(payload, report.sample.to_json().unwrap());
}

#[tokio::test]
async fn test_throttle_flags_tracked() {
    let mut config = fast_config();
    config.track_throttle = true;
    let mut host = FakeHost::healthy();
    host.throttle_mask = Some(0x50005);
    let mut monitor = monitor(&config, host, None, None);

    let report = monitor.tick().await;

    let flags = report.sample.throttle.as_ref().unwrap();
    assert_eq!(flags.get("Under-voltage detected"), Some(true));
    assert_eq!(flags.get("Currently throttled"), Some(true));
    assert_eq!(flags.get("Arm frequency capped"), Some(false));
    assert_eq!(flags.get("Under-voltage has occurred"), Some(true));
    assert_eq!(monitor.cycler().page_count(), 2);

    let value: serde_json::Value = serde_json::from_str(&report.sample.to_json().unwrap()).unwrap();
    assert_eq!(value["Throttling has occurred"], true);
}

#[tokio::test]
async fn test_throttle_read_failure_omits_flags() {
    let mut config = fast_config();
    config.track_throttle = true;
    let mut host = FakeHost::healthy();
    host.throttle_mask = None;
    let mut monitor = monitor(&config, host, None, None);

    let report = monitor.tick().await;
    assert!(report.sample.throttle.is_none());
    assert!(report.sample.cpu.is_some());
}

#[tokio::test]
async fn test_run_until_stops_on_shutdown_and_closes_charger() {
    let config = fast_config();
    let charger = script(true, true);
    let mut monitor = monitor(&config, FakeHost::healthy(), Some(&charger), None);

    let state = monitor
        .run_until(tokio::time::sleep(Duration::from_millis(80)))
        .await;

    assert!(!state.running);
    assert!(state.ticks > 0);

    assert_eq!(charger.lock().unwrap().closes, 1);
    assert_eq!(monitor.charger().unwrap().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_run_until_with_immediate_shutdown() {
    let config = fast_config();
    let mut monitor = monitor(&config, FakeHost::healthy(), None, None);

    let state = monitor.run_until(async {}).await;
    assert!(!state.running);
    assert_eq!(state.ticks, 0);
}

#[tokio::test]
async fn test_hung_host_read_is_bounded_by_io_timeout() {
    let config = fast_config();
    let mut host = FakeHost::healthy();
    host.cpu_hangs = true;
    let mut monitor = monitor(&config, host, None, None);

    let report = tokio::time::timeout(Duration::from_secs(2), monitor.tick())
        .await
        .expect("tick must not hang on a host read");

    assert!(report.sample.cpu.is_none());
    assert!(report.sample.ram.is_some());
}

#[tokio::test]
async fn test_hung_vcgencmd_does_not_block_shutdown() {
    use std::os::unix::fs::PermissionsExt;

    let script = std::env::temp_dir().join(format!("sbc-telemetry-hung-vcgencmd-{}", std::process::id()));
    std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = fast_config();
    config.track_throttle = true;
    let host = HostSensors::new("/nonexistent/thermal_zone0/temp")
        .with_vcgencmd(script.to_string_lossy())
        .with_io_timeout(Duration::from_secs(10));
    let mut monitor: Monitor<_, FakeCharger, FakeBroker, RecordingDisplay> =
        Monitor::new(&config, host, None, None, Some(RecordingDisplay::default()));

    // The loop's own bound applies even when the source's is looser
    let started = std::time::Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(2), monitor.tick())
        .await
        .expect("tick must not hang on vcgencmd");
    assert!(report.sample.throttle.is_none());
    assert!(report.sample.cpu.is_none());

    let state = monitor
        .run_until(tokio::time::sleep(Duration::from_millis(100)))
        .await;
    assert!(!state.running);
    assert!(started.elapsed() < Duration::from_secs(2));
    let _ = std::fs::remove_file(script);
}

#[tokio::test]
async fn test_charger_connect_result_shown_for_one_page_interval() {
    // 10 ms tick, 20 ms page switch: a connect result stays for two ticks
    let mut config = fast_config();
    config.page_switch_interval = Duration::from_millis(20);
    let charger = script(false, true);
    let mut monitor = monitor(&config, FakeHost::healthy(), Some(&charger), None);

    let report = monitor.tick().await;
    assert!(report.showing_status);
    assert_eq!(report.page[0].trim_end(), "Error connecting:");
    assert_eq!(report.page[1].trim_end(), "fake-charger");

    let report = monitor.tick().await;
    assert!(report.showing_status);
    assert_eq!(report.page[0].trim_end(), "Error connecting:");

    // Later failures in the same streak do not bring it back
    let report = monitor.tick().await;
    assert!(!report.showing_status);
    assert_eq!(report.page[0].as_str(), "12:34:56 C:12.5%");

    charger.lock().unwrap().connect_ok = true;
    let report = monitor.tick().await;
    assert!(report.showing_status);
    assert_eq!(report.page[0].trim_end(), "Connected to:");

    let (first, second) = monitor.display().device().unwrap().last_page().unwrap();
    assert_eq!(first.trim_end(), "Connected to:");
    assert_eq!(second.trim_end(), "fake-charger");
}

#[tokio::test]
async fn test_initial_connect_result_shown_on_first_tick() {
    let config = fast_config();
    let charger = script(true, true);
    let mut monitor = monitor(&config, FakeHost::healthy(), Some(&charger), None);

    monitor.start().await;
    let report = monitor.tick().await;

    assert!(report.showing_status);
    assert_eq!(report.page[0].trim_end(), "Connected to:");
    assert!(report.sample.has_charge_controller());
}

#[test]
fn test_sleep_after_compensates_for_drift() {
    let config = sbc_telemetry::MonitorConfig::default();
    let monitor = monitor(&config, FakeHost::healthy(), None, None);

    assert_eq!(monitor.sleep_after(Duration::from_millis(100)), Duration::from_millis(150));
    assert_eq!(monitor.sleep_after(Duration::from_millis(300)), Duration::ZERO);
}

#[test]
fn test_sleep_after_without_drift_compensation() {
    let mut config = sbc_telemetry::MonitorConfig::default();
    config.drift_compensation = false;
    let monitor = monitor(&config, FakeHost::healthy(), None, None);

    assert_eq!(monitor.sleep_after(Duration::from_millis(100)), Duration::from_millis(250));
}
