//! Runs the `plant.yaml` fixture through the library handlers and the
//! `pulse` binary.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use chrono::{DateTime, TimeZone, Utc};

use pulse_cli::scenario::Scenario;
use pulse_cli::simulate::simulate;
use pulse_cli::validate::validate_path;
use pulse_core::{MachineId, UtcRange};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/plant.yaml")
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

// ── library ──────────────────────────────────────────────────────────

#[test]
fn test_plant_fixture_is_valid() {
    assert_eq!(validate_path(&fixture()).unwrap(), Vec::<String>::new());
}

#[test]
fn test_plant_fixture_settles_after_two_rounds() {
    let scenario = Scenario::from_path(&fixture()).unwrap();
    let report = simulate(&scenario, 2).unwrap();

    assert!(report.rounds.iter().all(|r| r.failed.is_empty()));
    let ranges: Vec<(MachineId, UtcRange)> = report
        .assignments
        .iter()
        .map(|a| (a.machine, a.range))
        .collect();
    assert_eq!(
        ranges,
        vec![
            (MachineId(1), UtcRange::between(at(0, 30), at(1, 10)).unwrap()),
            (MachineId(2), UtcRange::between(at(0, 20), at(0, 25)).unwrap()),
            (MachineId(3), UtcRange::between(at(0, 15), at(0, 18)).unwrap()),
        ]
    );

    let checkpoints: Vec<(MachineId, &str, DateTime<Utc>)> = report
        .checkpoints
        .iter()
        .map(|c| (c.key.machine, c.key.key.as_str(), c.at))
        .collect();
    assert_eq!(
        checkpoints,
        vec![
            (MachineId(1), "LongIdle.ten-minutes.DateTime", at(1, 10)),
            (MachineId(2), "CycleEnd.press.DateTime", at(0, 45)),
            (MachineId(2), "LongIdle.ten-minutes.DateTime", at(0, 5)),
            (MachineId(3), "CycleEnd.main.DateTime.31", at(0, 15)),
        ]
    );
}

#[test]
fn test_more_rounds_change_nothing_once_settled() {
    let scenario = Scenario::from_path(&fixture()).unwrap();
    let settled = simulate(&scenario, 2).unwrap();
    let later = simulate(&scenario, 5).unwrap();
    assert_eq!(settled.assignments.len(), later.assignments.len());
    assert_eq!(settled.checkpoints, later.checkpoints);
}

// ── binary ───────────────────────────────────────────────────────────

#[test]
fn test_binary_prints_simulation_report_as_json() {
    let output = Command::new(env!("CARGO_BIN_EXE_pulse"))
        .args(["simulate", "--rounds", "2"])
        .arg(fixture())
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["assignments"].as_array().unwrap().len(), 3);
    assert_eq!(report["rounds"].as_array().unwrap().len(), 2);
}

#[test]
fn test_binary_validate_exits_with_one_on_issues() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"engine:\n  pass_max_time_ms: 0\n").unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_pulse"))
        .arg("validate")
        .arg(file.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("pass_max_time_ms"));
}
