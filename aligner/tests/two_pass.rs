//! Alignment pass followed by efficiency pass on synthetic runs

mod common;

use aligner::{
    analyze_runs, AlignError, CalibrationSource, CalibratorConfig, DriverConfig, DriverState,
    MemoryEventSource, StripEfficiency,
};
use approx::assert_relative_eq;
use common::{synthetic_events, SensorParams};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> DriverConfig {
    DriverConfig {
        calibration_dir: dir.path().join("alignment"),
        output_dir: dir.path().join("output"),
        write_diagnostics: false,
        calibrator: CalibratorConfig {
            n_sigma: 3.0,
            ..CalibratorConfig::default()
        },
        ..DriverConfig::default()
    }
}

fn two_sensors() -> Vec<SensorParams> {
    vec![
        SensorParams::new(1, 0.2, -0.1, 0.9),
        SensorParams::new(2, -0.3, 0.25, 0.6),
    ]
}

#[test]
fn test_alignment_then_efficiency() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let events = synthetic_events(&two_sensors(), 6000, 11);
    let mut source = MemoryEventSource::new().with_run(1, events);

    let mut driver = StripEfficiency::new(1, config).unwrap();
    assert_eq!(driver.state(), &DriverState::Idle);
    assert_eq!(driver.step(&mut source).unwrap(), &DriverState::AlignmentPass);
    assert_eq!(
        driver.step(&mut source).unwrap(),
        &DriverState::Calibrated {
            source: CalibrationSource::Fitted
        }
    );

    let offset_1 = driver.calibrators()[&1].offset().unwrap();
    let offset_2 = driver.calibrators()[&2].offset().unwrap();
    assert_relative_eq!(offset_1.x, 0.2, epsilon = 0.01);
    assert_relative_eq!(offset_1.y, -0.1, epsilon = 0.03);
    assert_relative_eq!(offset_2.x, -0.3, epsilon = 0.01);
    assert_relative_eq!(offset_2.y, 0.25, epsilon = 0.03);

    // Every fitted sensor was persisted
    assert_eq!(driver.store().list_sensors(1).unwrap(), vec![1, 2]);

    assert_eq!(driver.step(&mut source).unwrap(), &DriverState::EfficiencyPass);
    assert_eq!(driver.step(&mut source).unwrap(), &DriverState::Finished);

    let report = driver.report().unwrap();
    assert_eq!(report.alignment_events, 6000);
    assert_eq!(report.efficiency_events, 6000);
    assert_eq!(report.calibration_source, CalibrationSource::Fitted);

    let eff_1 = report.sensors[0].efficiency.as_ref().unwrap();
    let eff_2 = report.sensors[1].efficiency.as_ref().unwrap();
    assert_eq!(eff_1.total, 6000);
    assert_eq!(eff_2.total, 6000);
    let e1 = eff_1.efficiency.unwrap();
    let e2 = eff_2.efficiency.unwrap();
    assert!(e1 > 0.80 && e1 < 0.92, "sensor 1 efficiency {e1}");
    assert!(e2 > 0.52 && e2 < 0.62, "sensor 2 efficiency {e2}");
    assert!(report.sensors[0].fit.is_some());
}

#[test]
fn test_persisted_calibration_skips_alignment() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let events = synthetic_events(&two_sensors(), 6000, 12);
    let mut source = MemoryEventSource::new().with_run(3, events);

    let first = StripEfficiency::new(3, config.clone())
        .unwrap()
        .process(&mut source)
        .unwrap();
    let second = StripEfficiency::new(3, config.clone())
        .unwrap()
        .process(&mut source)
        .unwrap();

    assert_eq!(second.calibration_source, CalibrationSource::Loaded);
    assert_eq!(second.alignment_events, 0);
    for (a, b) in first.sensors.iter().zip(&second.sensors) {
        assert_eq!(a.sensor, b.sensor);
        assert_eq!(a.calibration, b.calibration);
        assert!(b.fit.is_none());
        assert_eq!(a.efficiency, b.efficiency);
    }

    // Forcing refits from data even though files exist
    let forced = StripEfficiency::new(
        3,
        DriverConfig {
            force_alignment: true,
            ..config
        },
    )
    .unwrap()
    .process(&mut source)
    .unwrap();
    assert_eq!(forced.calibration_source, CalibrationSource::Fitted);
    assert_eq!(forced.alignment_events, 6000);
}

#[test]
fn test_partially_persisted_sensors_are_refitted() {
    let dir = TempDir::new().unwrap();
    let config = DriverConfig {
        sensors: vec![1, 2],
        ..test_config(&dir)
    };
    std::fs::create_dir_all(&config.calibration_dir).unwrap();
    std::fs::write(
        config.calibration_dir.join("run000004_sensor01.align"),
        "0.2 -0.1 0 0.05 0.3\n",
    )
    .unwrap();

    let events = synthetic_events(&two_sensors(), 6000, 13);
    let mut source = MemoryEventSource::new().with_run(4, events);
    let report = StripEfficiency::new(4, config)
        .unwrap()
        .process(&mut source)
        .unwrap();
    assert_eq!(report.calibration_source, CalibrationSource::Fitted);
    assert_eq!(report.sensors.len(), 2);
}

#[test]
fn test_sensor_without_calibration_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = DriverConfig {
        sensors: vec![1, 7],
        ..test_config(&dir)
    };
    // Sensor 7 has predicted tracks but never a hit, so it cannot be aligned
    let sensors = vec![
        SensorParams::new(1, 0.0, 0.0, 0.9),
        SensorParams::new(7, 0.0, 0.0, 0.0),
    ];
    let mut source = MemoryEventSource::new().with_run(5, synthetic_events(&sensors, 6000, 14));

    let mut driver = StripEfficiency::new(5, config).unwrap();
    let err = driver.process(&mut source).unwrap_err();
    assert!(
        matches!(err, AlignError::MissingCalibration { run: 5, sensor: 7 }),
        "unexpected error {err}"
    );
    assert_eq!(driver.state(), &DriverState::EfficiencyPass);
}

#[test]
fn test_malformed_calibration_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    std::fs::create_dir_all(&config.calibration_dir).unwrap();
    std::fs::write(
        config.calibration_dir.join("run000006_sensor01.align"),
        "0.2 -0.1 0\n",
    )
    .unwrap();

    let events = synthetic_events(&two_sensors(), 100, 15);
    let mut source = MemoryEventSource::new().with_run(6, events);
    match StripEfficiency::new(6, config).unwrap().process(&mut source) {
        Err(AlignError::Sensor { sensor, source }) => {
            assert_eq!(sensor, 1);
            assert!(matches!(*source, AlignError::CalibrationParse { .. }));
        }
        other => panic!("expected a parse failure, got {other:?}"),
    }
}

#[test]
fn test_analyze_runs_keeps_runs_separate() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let config = DriverConfig {
        runs: vec![10, 11],
        ..test_config(&dir)
    };
    let mut source = MemoryEventSource::new()
        .with_run(
            10,
            synthetic_events(&[SensorParams::new(1, 0.1, 0.0, 0.9)], 6000, 16),
        )
        .with_run(
            11,
            synthetic_events(&[SensorParams::new(1, -0.1, 0.0, 0.9)], 6000, 17),
        );

    let reports = analyze_runs(&config, &mut source).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].run, 10);
    assert_eq!(reports[1].run, 11);
    assert_relative_eq!(reports[0].sensors[0].calibration.offset.x, 0.1, epsilon = 0.01);
    assert_relative_eq!(reports[1].sensors[0].calibration.offset.x, -0.1, epsilon = 0.01);

    let empty = DriverConfig {
        runs: Vec::new(),
        ..config
    };
    assert!(matches!(
        analyze_runs(&empty, &mut source),
        Err(AlignError::InvalidConfig(_))
    ));
}
