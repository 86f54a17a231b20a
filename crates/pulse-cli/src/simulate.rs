//! # Simulate Subcommand
//!
//! Runs scheduler rounds over a scenario against the in-memory store and
//! prints what the engine persisted: reason assignments and checkpoints.
//!
//! The clock is simulated. It starts at the scenario's `start` and moves by
//! `step_secs` after every round, so a run is deterministic.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use pulse_analysis::{InMemoryServices, MachineActivityAnalysis, RoundReport, Scheduler};
use pulse_autoreason::{AutoReasonRegistry, ConfigurationProvider};
use pulse_core::{Clock, ManualClock};
use pulse_store::{CheckpointKey, InMemoryStore, ReasonAssignment};

use crate::scenario::Scenario;

/// Arguments for the `pulse simulate` subcommand.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Scenario document.
    pub scenario: PathBuf,

    /// Number of scheduler rounds to run.
    #[arg(long, default_value_t = 1)]
    pub rounds: u64,
}

/// A persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointEntry {
    pub key: CheckpointKey,
    pub at: DateTime<Utc>,
}

/// Everything a simulation produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub rounds: Vec<RoundReport>,
    pub assignments: Vec<ReasonAssignment>,
    pub checkpoints: Vec<CheckpointEntry>,
    /// Clock value after the last round.
    pub finished_at: DateTime<Utc>,
}

/// Execute the simulate subcommand.
pub fn run_simulate(args: &SimulateArgs) -> Result<u8> {
    let scenario = Scenario::from_path(&args.scenario)?;
    let report = simulate(&scenario, args.rounds)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.rounds.iter().all(|r| r.failed.is_empty()) {
        0
    } else {
        2
    })
}

/// Run `rounds` scheduler rounds over `scenario`.
pub fn simulate(scenario: &Scenario, rounds: u64) -> Result<SimulationReport> {
    if let Err(e) = scenario.engine.validate() {
        bail!("scenario engine configuration: {e}");
    }
    let invalid = scenario.extensions.validate_all();
    for (plugin, issue) in &invalid {
        tracing::warn!(plugin = %plugin, error = %issue, "extension instance will be skipped");
    }

    let config = Arc::new(scenario.engine.clone());
    let clock = Arc::new(ManualClock::new(scenario.start));
    let store = Arc::new(scenario.seed_store());
    let resolver = Arc::new(scenario.resolver());
    let provider = Arc::new(scenario.extensions.clone());

    let mut scheduler = Scheduler::new(config.clone(), clock.clone());
    for machine in &scenario.machines {
        let registry = AutoReasonRegistry::with_builtin_rules(resolver.clone(), provider.clone());
        let context = MachineActivityAnalysis::new(
            machine.clone(),
            store.clone(),
            Arc::new(InMemoryServices::new(
                clock.clone(),
                config.past_modifications_age(),
            )),
            clock.clone(),
            config.clone(),
        )
        .with_registry(Arc::new(registry));
        scheduler
            .add_machine(context)
            .with_context(|| format!("cannot schedule {}", machine.id))?;
    }

    let mut reports = Vec::new();
    for round in 0..rounds {
        if round > 0 {
            clock.advance(scenario.step());
        }
        let report = scheduler.run_round();
        tracing::info!(
            round = round + 1,
            completed = report.completed.len(),
            failed = report.failed.len(),
            "simulated round"
        );
        reports.push(report);
    }

    Ok(SimulationReport {
        rounds: reports,
        assignments: collect_assignments(scenario, &store),
        checkpoints: collect_checkpoints(scenario, &store, provider.as_ref())?,
        finished_at: clock.now(),
    })
}

fn collect_assignments(scenario: &Scenario, store: &InMemoryStore) -> Vec<ReasonAssignment> {
    let mut assignments: Vec<ReasonAssignment> = scenario
        .machines
        .iter()
        .flat_map(|m| store.assignments(m.id))
        .collect();
    assignments.sort_by(|a, b| {
        (a.machine, a.range.lower(), &a.origin).cmp(&(b.machine, b.range.lower(), &b.origin))
    });
    assignments
}

/// Checkpoints of every configured instance on every machine, machine keys
/// first then module keys.
fn collect_checkpoints(
    scenario: &Scenario,
    store: &InMemoryStore,
    provider: &dyn ConfigurationProvider,
) -> Result<Vec<CheckpointEntry>> {
    let mut entries = Vec::new();
    for plugin in scenario.extensions.plugin_keys() {
        for config in provider.configurations(plugin)? {
            let prefix = format!("{plugin}.{}", config.instance);
            for machine in &scenario.machines {
                let mut keys = vec![CheckpointKey::machine(machine.id, &prefix)];
                keys.extend(
                    machine
                        .modules
                        .iter()
                        .map(|&module| CheckpointKey::module(machine.id, &prefix, module)),
                );
                entries.extend(keys.into_iter().filter_map(|key| {
                    store.checkpoint(&key).map(|at| CheckpointEntry { key, at })
                }));
            }
        }
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::MachineId;

    const SCENARIO: &str = r#"
start: 2024-01-01T02:00:00Z
machines:
  - id: 1
    name: press
  - id: 2
    name: lathe
cycles:
  - machine: 1
    end: 2024-01-01T00:10:00Z
  - machine: 2
    end: 2024-01-01T00:40:00Z
answers:
  - selector: NextProduction
    machine: 1
    response: { final: 2024-01-01T00:25:00Z }
  - selector: NextProduction
    machine: 2
    response: { no_data: true }
extensions:
  CycleEnd:
    - instance: main
      default_reason_key: CycleEnd
      dynamic_end: NextProduction
      start: 2024-01-01T00:00:00Z
"#;

    #[test]
    fn test_simulation_applies_and_postpones() {
        let scenario = Scenario::from_yaml_str(SCENARIO).unwrap();
        let report = simulate(&scenario, 2).unwrap();

        assert_eq!(report.rounds.len(), 2);
        assert!(report.rounds.iter().all(|r| r.failed.is_empty()));
        assert_eq!(report.assignments.len(), 1);
        assert_eq!(report.assignments[0].machine, MachineId(1));
        assert_eq!(report.checkpoints.len(), 1);
        assert_eq!(report.checkpoints[0].key.machine, MachineId(1));
        assert_eq!(
            report.finished_at,
            scenario.start + chrono::Duration::seconds(60)
        );
    }

    #[test]
    fn test_invalid_engine_configuration_is_refused() {
        let mut scenario = Scenario::from_yaml_str(SCENARIO).unwrap();
        scenario.engine.max_parallel_machines = 0;
        assert!(simulate(&scenario, 1).is_err());
    }

    #[test]
    fn test_report_serializes_to_json() {
        let scenario = Scenario::from_yaml_str(SCENARIO).unwrap();
        let report = simulate(&scenario, 1).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["assignments"][0]["range"].is_object());
        assert_eq!(json["checkpoints"][0]["key"]["key"], "CycleEnd.main.DateTime");
    }
}
