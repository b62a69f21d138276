/*
 * Integration tests for bmcfan
 *
 * These tests drive the public bf_core API the way the daemon does: fetch the
 * sensor table, compute a duty, quantize and actuate, then export.
 */

use std::collections::HashMap;
use std::time::Duration;

use bf_core::data::config::keys;
use bf_core::hw::{DmiField, DmiSource};
use bf_core::testing::ScriptedTransport;
use bf_core::{
    quantize, read_status, ControllerConfig, Exporter, PiController, PlatformIdentity,
    SafeExecutor, SensorReader, StatusSnapshot, Step, TargetState, TargetStatus, VendorPolicy,
    VendorSetting,
};
use mockall::mock;
use serial_test::serial;

// Test utilities
fn config_with(pairs: &[(&str, &str)]) -> ControllerConfig {
    let values: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ControllerConfig::from_lookup(|key| values.get(key).cloned()).unwrap()
}

fn executor(transport: &ScriptedTransport) -> SafeExecutor<&ScriptedTransport> {
    SafeExecutor::new(transport, Duration::from_secs(5), 3)
}

const TABLE: &str = "\
CPU1 Temp        | 01h | ok  |  3.1 | 70 degrees C
CPU2 Temp        | 02h | ok  |  3.2 | 58 degrees C
PCH Temp         | 0Ah | ok  |  7.1 | 49 degrees C
";

mock! {
    pub Dmi {}
    impl DmiSource for Dmi {
        fn read(&self, field: DmiField) -> Option<String>;
    }
}

// ============================================================================
// End-to-end control cycles
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stepped_cycle_from_cold_start() {
    let config = config_with(&[(keys::INITIAL_DUTY, "10")]);
    let transport = ScriptedTransport::new().with_sensor_table(TABLE);
    let executor = executor(&transport);
    let pi = PiController::new(&config);

    let mut reader = SensorReader::new();
    let snapshot = reader.fetch(&executor).await.unwrap().clone();

    let policy = VendorPolicy::Stepped;
    let mut targets = policy.build_targets(&config).unwrap();
    let cpu1 = &mut targets[0];

    let temperature = cpu1.temperature(&snapshot).unwrap();
    assert_eq!(temperature, 70);

    // error 5 -> proportional 15 -> want 25 -> slew-limited to 16
    let duty = pi.compute(&mut cpu1.state, temperature);
    assert_eq!(duty, 16);

    policy
        .apply_duty(&executor, cpu1, duty, config.hysteresis)
        .await
        .unwrap();
    cpu1.state.last_duty = duty;

    assert_eq!(cpu1.state.last_step, Step::from_percent(25));
    assert_eq!(
        transport.actuation_calls(),
        vec!["raw 0x30 0x70 0x66 0x01 0x00 0x30".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_continuous_quiet_cap_after_cooldown() {
    let config = config_with(&[(keys::INITIAL_DUTY, "30")]);
    let transport = ScriptedTransport::new();
    let executor = executor(&transport);
    let pi = PiController::new(&config);

    let policy = VendorPolicy::Continuous;
    let mut targets = policy.build_targets(&config).unwrap();
    assert_eq!(targets.len(), 1);
    let chassis = &mut targets[0];

    let mut reader = SensorReader::new();
    for (cpu1, cpu2) in [(60, 55), (44, 41)] {
        transport.push_sensor_reply(&format!(
            "CPU1 Temp | 01h | ok | 3.1 | {} degrees C\nCPU2 Temp | 02h | ok | 3.2 | {} degrees C\n",
            cpu1, cpu2
        ));
        let snapshot = reader.fetch(&executor).await.unwrap();
        let temperature = chassis.temperature(snapshot).unwrap();
        assert_eq!(temperature, cpu1);

        let duty = pi.compute(&mut chassis.state, temperature);
        policy
            .apply_duty(&executor, chassis, duty, config.hysteresis)
            .await
            .unwrap();
        chassis.state.last_duty = duty;
    }

    assert_eq!(chassis.state.last_duty, 15);
    assert_eq!(
        transport.actuation_calls(),
        vec![
            "raw 0x30 0x30 0x02 0xff 0x18".to_string(),
            "raw 0x30 0x30 0x02 0xff 0x0f".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_manual_mode_bracketing_for_continuous_boards() {
    let transport = ScriptedTransport::new();
    let executor = executor(&transport);

    assert!(VendorPolicy::Continuous.enter_manual_mode(&executor).await.unwrap());
    assert!(VendorPolicy::Continuous.restore_automatic_mode(&executor).await.unwrap());
    assert!(!VendorPolicy::Stepped.enter_manual_mode(&executor).await.unwrap());
    assert!(!VendorPolicy::Stepped.restore_automatic_mode(&executor).await.unwrap());

    assert_eq!(
        transport.calls(),
        vec![
            "raw 0x30 0x30 0x01 0x00".to_string(),
            "raw 0x30 0x30 0x01 0x01".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_fetch_failure_is_retried() {
    let transport = ScriptedTransport::new().with_sensor_table(TABLE);
    transport.push_sensor_failure();
    let executor = executor(&transport);

    let mut reader = SensorReader::new();
    let snapshot = reader.fetch(&executor).await.unwrap();
    assert_eq!(snapshot.rows().len(), 3);
    assert_eq!(transport.count("sdr type temperature"), 2);
}

// ============================================================================
// Controller properties
// ============================================================================

#[test]
fn test_deadband_decays_to_floor() {
    let config = config_with(&[]);
    let pi = PiController::new(&config);
    let mut state = TargetState::new(14);

    let mut previous = state.last_duty;
    for _ in 0..10 {
        let duty = pi.compute(&mut state, config.setpoint + 1);
        assert!(duty <= previous);
        assert!(duty >= config.min_duty);
        state.last_duty = duty;
        previous = duty;
    }
    assert_eq!(state.last_duty, config.min_duty);
}

#[test]
fn test_output_grows_with_error_until_clamped() {
    let config = config_with(&[(keys::MAX_SLEW, "100"), (keys::QUIET_THRESHOLD, "0")]);
    let pi = PiController::new(&config);

    let mut previous = 0;
    for temperature in 68..=85 {
        let duty = pi.compute(&mut TargetState::new(40), temperature);
        assert!(duty > previous || duty == config.max_duty);
        previous = duty;
    }
    assert_eq!(previous, config.max_duty);
}

#[test]
fn test_slew_and_quiet_cap_hold_across_temperatures() {
    let config = config_with(&[]);
    let pi = PiController::new(&config);

    for last in [10u8, 15, 40, 70, 100] {
        for temperature in 20..=95 {
            let mut state = TargetState::new(last);
            let duty = pi.compute(&mut state, temperature);

            if temperature < config.quiet_threshold {
                assert!(duty <= config.quiet_max_duty, "{}°C from {}% gave {}%", temperature, last, duty);
            } else {
                let delta = (duty as i16 - last as i16).unsigned_abs();
                assert!(delta <= config.max_slew as u16, "{}°C from {}% gave {}%", temperature, last, duty);
            }
        }
    }
}

#[test]
fn test_quantizer_hysteresis() {
    let fifty = Step::from_percent(50);

    assert_eq!(quantize(52, fifty, 3), Step::from_percent(50).unwrap());
    assert_eq!(quantize(54, fifty, 3), Step::from_percent(60).unwrap());
    assert_eq!(quantize(44, fifty, 3), Step::from_percent(50).unwrap());
    assert_eq!(quantize(37, fifty, 3), Step::from_percent(40).unwrap());
    assert_eq!(quantize(0, fifty, 3), Step::from_percent(50).unwrap());
}

#[test]
fn test_step_table_codes_recover_steps() {
    let steps: Vec<Step> = Step::all().collect();
    assert_eq!(steps.len(), 12);
    for step in steps {
        assert_eq!(Step::from_code(step.code()), Some(step));
    }
}

// ============================================================================
// Platform detection
// ============================================================================

#[test]
fn test_detection_from_dmi() {
    let mut dmi = MockDmi::new();
    dmi.expect_read().returning(|field| match field {
        DmiField::SysVendor => Some("Dell Inc.".to_string()),
        DmiField::ProductName => Some("PowerEdge R720".to_string()),
        _ => None,
    });

    let identity = PlatformIdentity::gather(&dmi);
    assert_eq!(identity.manufacturer.as_deref(), Some("Dell Inc."));
    assert_eq!(VendorPolicy::detect(&identity), VendorPolicy::Continuous);
    assert_eq!(VendorPolicy::resolve(VendorSetting::Auto, &dmi), VendorPolicy::Continuous);
}

#[test]
fn test_override_skips_detection() {
    let mut dmi = MockDmi::new();
    dmi.expect_read().never();

    assert_eq!(VendorPolicy::resolve(VendorSetting::Stepped, &dmi), VendorPolicy::Stepped);
}

// ============================================================================
// Configuration and export
// ============================================================================

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bmcfan");
    std::fs::write(
        &path,
        "# bmcfan settings\nBMCFAN_SETPOINT=60\nexport BMCFAN_VENDOR=\"dell\"\nBMCFAN_KP=2.5\n",
    )
    .unwrap();

    std::env::set_var(keys::KP, "4");
    let loaded = ControllerConfig::load(Some(&path));
    std::env::remove_var(keys::KP);

    let config = loaded.unwrap();
    assert_eq!(config.setpoint, 60);
    assert_eq!(config.vendor, VendorSetting::Continuous);
    assert_eq!(config.gain_p, 4.0);
    assert_eq!(config.deadband, 2);
}

#[test]
#[serial]
fn test_invalid_environment_value_is_rejected() {
    std::env::set_var(keys::MIN_DUTY, "90");
    std::env::set_var(keys::MAX_DUTY, "40");
    let loaded = ControllerConfig::load(None);
    std::env::remove_var(keys::MIN_DUTY);
    std::env::remove_var(keys::MAX_DUTY);

    assert!(loaded.is_err());
}

#[test]
fn test_published_status_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with(&[]);
    let exporter = Exporter::new(dir.path().join("m/bmcfan.prom"), dir.path().join("s/status.json"));
    exporter.prepare().unwrap();

    let targets = vec![TargetStatus {
        name: "chassis".to_string(),
        bank: None,
        temperature: Some(48),
        duty: 15,
        step: None,
    }];
    let snapshot = StatusSnapshot::new(&config, VendorPolicy::Continuous, targets, 7, true);
    exporter.publish(&snapshot).unwrap();

    assert_eq!(read_status(exporter.status_file()).unwrap(), snapshot);

    let metrics = std::fs::read_to_string(exporter.metrics_file()).unwrap();
    assert!(metrics.contains("bmcfan_up 1\n"));
    assert!(metrics.contains("bmcfan_vendor_info{dialect=\"continuous\"} 1\n"));
    assert!(metrics.contains("bmcfan_duty_percent{target=\"chassis\"} 15\n"));
    assert!(!metrics.contains("step_percent"));
}
