//! End-to-end detection scenarios driven through the session.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sensorwatch::config::{HysteresisConfig, RulConfig, RulUnit};
use sensorwatch::predict::RulStatus;
use sensorwatch::simulate::gaussian;
use sensorwatch::{EngineConfig, Method, Output, Sample, Session, Severity, Sink};

fn session(cfg: EngineConfig) -> Session {
    Session::new(cfg).unwrap()
}

fn feed(s: &mut Session, values: &[f64]) -> Vec<Output> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| s.ingest(&Sample::scalar(i as i64 * 1000, *v)).unwrap().unwrap())
        .collect()
}

#[test]
fn zscore_flags_spike() {
    let mut s = session(EngineConfig {
        method: Method::ZScore,
        zscore_threshold: 2.5,
        zscore_warning: 2.0,
        window_size: 20,
        ..Default::default()
    });
    let mut rng = StdRng::seed_from_u64(1);
    let mut values: Vec<f64> = (0..20).map(|_| rng.gen_range(45.2..=46.3)).collect();
    values.push(52.5);

    let out = feed(&mut s, &values);
    let last = out.last().unwrap();
    assert!(last.is_anomaly);
    assert_eq!(last.severity, Severity::Critical);
    assert!(last.details["zScore"].abs() > 2.5);
    assert_eq!(last.sink(), Sink::Anomaly);
}

#[test]
fn iqr_warms_up_for_three_samples() {
    let mut s = session(EngineConfig {
        method: Method::Iqr,
        iqr_multiplier: 1.5,
        window_size: 100,
        ..Default::default()
    });
    let out = feed(&mut s, &[3.2, 3.4, 3.3, 3.3]);
    for o in &out[..3] {
        assert!(o.warmup);
        assert!(!o.is_anomaly);
        assert_eq!(o.sink(), Sink::Normal);
    }
    assert!(!out[3].warmup);
    assert!(out[3].details.contains_key("iqr"));
}

#[test]
fn threshold_reports_breach_above() {
    let mut s = session(EngineConfig {
        method: Method::Threshold,
        min_threshold: Some(0.0),
        max_threshold: Some(100.0),
        ..Default::default()
    });
    let out = feed(&mut s, &[50.0, 50.0, 150.0]);
    assert!(!out[1].is_anomaly);
    assert_eq!(out[2].severity, Severity::Critical);
    assert!(out[2].status_text.contains("Above"));
}

#[test]
fn hysteresis_holds_alarm_until_two_normals() {
    let mut s = session(EngineConfig {
        method: Method::Threshold,
        max_threshold: Some(100.0),
        hysteresis: HysteresisConfig {
            enabled: true,
            consecutive_count: 1,
            hysteresis_percent: 100.0,
        },
        ..Default::default()
    });
    let out = feed(&mut s, &[40.0, 50.0, 110.0, 50.0, 50.0]);

    assert!(out[2].is_anomaly);
    assert!(out[2].raw_anomaly);

    assert!(out[3].is_anomaly);
    assert!(!out[3].raw_anomaly);
    assert_eq!(out[3].severity, Severity::Warning);
    assert!(out[3].hysteresis.applied);
    assert_eq!(out[3].hysteresis.consecutive_normals, 1);

    assert!(!out[4].is_anomaly);
    assert_eq!(out[4].severity, Severity::Normal);
}

#[test]
fn multi_stream_isolates_offending_sensor() {
    let mut s = session(EngineConfig {
        method: Method::ZScore,
        zscore_threshold: 2.0,
        zscore_warning: 1.5,
        window_size: 10,
        ..Default::default()
    });
    for i in 0..15 {
        let t = 65.0 + 0.5 * (i as f64 * 1.7).sin();
        let p = 4.5 + 0.1 * (i as f64 * 2.3).cos();
        s.ingest(&Sample::named(i * 1000, [("temperature", t), ("pressure", p)]))
            .unwrap();
    }
    let out = s
        .ingest(&Sample::named(15_000, [("temperature", 95.0), ("pressure", 4.5)]))
        .unwrap()
        .unwrap();

    assert_eq!(out.anomaly_sensors.as_deref(), Some(&["temperature".to_string()][..]));
    assert!(out.stream("temperature").unwrap().is_anomaly);
    assert!(!out.stream("pressure").unwrap().is_anomaly);
    assert_eq!(out.sensor_count, Some(2));
    assert_eq!(out.input_format, Some("multi-sensor"));

    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json["payload"]["temperature"]["isAnomaly"], true);
    assert_eq!(json["payload"]["pressure"]["isAnomaly"], false);
}

#[test]
fn pca_names_first_sensor() {
    let mut s = session(EngineConfig {
        method: Method::Pca,
        window_size: 20,
        ..Default::default()
    });
    for i in 0..15 {
        let t = i as f64;
        let row = [
            ("s1", 10.0 + 0.05 * (1.3 * t).sin()),
            ("s2", 20.0 + 0.05 * (0.7 * t).cos()),
            ("s3", 30.0 + 0.05 * (2.1 * t + 0.5).sin()),
        ];
        let out = s.ingest(&Sample::named(i * 1000, row)).unwrap().unwrap();
        assert_eq!(out.warmup, i < 9);
    }
    let out = s
        .ingest(&Sample::named(15_000, [("s1", 100.0), ("s2", 20.0), ("s3", 30.0)]))
        .unwrap()
        .unwrap();

    assert!(out.is_anomaly);
    assert_eq!(out.top_contributor.as_deref(), Some("s1"));
    assert_eq!(out.anomaly_sensors.as_deref(), Some(&["s1".to_string()][..]));
    assert!(out.details["t2"] > out.details["t2Threshold"]);
}

#[test]
fn rul_linear_degradation() {
    let mut s = session(EngineConfig {
        window_size: 20,
        rul: RulConfig {
            enabled: true,
            failure_threshold: Some(100.0),
            unit: RulUnit::Hours,
            ..Default::default()
        },
        ..Default::default()
    });
    let mut rng = StdRng::seed_from_u64(7);
    let values: Vec<f64> = (0..15).map(|i| 10.0 + 3.0 * i as f64 + 5.0 * gaussian(&mut rng)).collect();
    let out = feed(&mut s, &values);

    let rul = out.last().unwrap().rul.as_ref().unwrap();
    assert!(rul.value.unwrap().is_finite());
    assert!(matches!(rul.status, RulStatus::Healthy | RulStatus::Warning));
    assert!(rul.degradation.rate > 0.0);
    assert_eq!(rul.unit, RulUnit::Hours);
}

#[test]
fn health_index_tracks_anomalous_stream() {
    let mut s = session(EngineConfig {
        zscore_threshold: 2.0,
        zscore_warning: 1.5,
        window_size: 10,
        health: sensorwatch::config::HealthConfig {
            enabled: true,
            ..Default::default()
        },
        ..Default::default()
    });
    for i in 0..15 {
        let t = 65.0 + 0.5 * (i as f64 * 1.7).sin();
        let p = 4.5 + 0.1 * (i as f64 * 2.3).cos();
        s.ingest(&Sample::named(i * 1000, [("temperature", t), ("pressure", p)]))
            .unwrap();
    }
    let out = s
        .ingest(&Sample::named(15_000, [("temperature", 95.0), ("pressure", 4.5)]))
        .unwrap()
        .unwrap();

    let health = out.health.unwrap();
    assert_eq!(health.worst_sensor.as_deref(), Some("temperature"));
    assert!(health.sensor_scores["temperature"] < health.sensor_scores["pressure"]);
    assert!(health.index < 100.0);
}
