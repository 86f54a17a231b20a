//! # Scheduler
//!
//! Runs one activity pass per machine per round, at most
//! `max_parallel_machines` machines at a time. A failing or panicking
//! machine is reported and retried on the next round; it never stops the
//! others.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use pulse_core::{Clock, EngineConfig, MachineId};
use pulse_state::{Budget, TerminalSignal};

use crate::context::MachineActivityAnalysis;
use crate::error::AnalysisError;
use crate::pipeline::{build_activity_pipeline, ActivityPipeline};

/// One scheduled machine with its frozen pipeline.
struct MachineSlot {
    context: MachineActivityAnalysis,
    pipeline: ActivityPipeline,
    passes: u64,
}

impl MachineSlot {
    fn run_pass(&mut self, clock: &Arc<dyn Clock>, config: &EngineConfig) -> Result<TerminalSignal, AnalysisError> {
        let machine = self.context.machine_id();
        let span = tracing::info_span!("activity_pass", machine = %machine, pass = self.passes);
        let _guard = span.enter();
        self.passes += 1;
        let budget = Budget::start(clock.clone(), config.pass_max_time());
        let signal = self.pipeline.run(&mut self.context, &budget)?;
        tracing::debug!(
            transitions = self.pipeline.transitions().len(),
            completed = signal.is_completed(),
            "pass finished"
        );
        Ok(signal)
    }
}

/// Outcome of one scheduler round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    /// Machines whose pass reached a terminal state.
    pub completed: Vec<MachineId>,
    /// Machines whose pass yielded to the budget.
    pub yielded: Vec<MachineId>,
    /// Machines whose pass failed, with the rendered error.
    pub failed: Vec<(MachineId, String)>,
}

enum SlotResult {
    Completed,
    Yielded,
    Failed(String),
}

/// Drives the activity pipelines of all registered machines.
pub struct Scheduler {
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    slots: Vec<MachineSlot>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("machines", &self.machines())
            .finish()
    }
}

impl Scheduler {
    pub fn new(config: Arc<EngineConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            slots: Vec::new(),
        }
    }

    /// Build the pipeline of `context` and schedule it. Returns `false`
    /// when the engine's machine filter excludes the machine.
    pub fn add_machine(&mut self, context: MachineActivityAnalysis) -> Result<bool, AnalysisError> {
        let machine = context.machine_id();
        if !self.config.machines.matches(machine) {
            tracing::info!(machine = %machine, "machine excluded by engine filter");
            return Ok(false);
        }
        let pipeline = build_activity_pipeline(&context)?;
        tracing::info!(machine = %machine, states = pipeline.len(), "machine scheduled");
        self.slots.push(MachineSlot {
            context,
            pipeline,
            passes: 0,
        });
        Ok(true)
    }

    pub fn machines(&self) -> Vec<MachineId> {
        self.slots.iter().map(|s| s.context.machine_id()).collect()
    }

    /// Context of a scheduled machine.
    pub fn context(&self, machine: MachineId) -> Option<&MachineActivityAnalysis> {
        self.slots
            .iter()
            .map(|s| &s.context)
            .find(|c| c.machine_id() == machine)
    }

    /// Run one pass of every machine.
    pub fn run_round(&mut self) -> RoundReport {
        let width = self.config.max_parallel_machines.max(1);
        let clock = &self.clock;
        let config = &self.config;
        let mut report = RoundReport::default();

        for chunk in self.slots.chunks_mut(width) {
            let results: Vec<(MachineId, SlotResult)> = std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter_mut()
                    .map(|slot| {
                        let machine = slot.context.machine_id();
                        (machine, scope.spawn(move || slot.run_pass(clock, config)))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(machine, handle)| {
                        let result = match handle.join() {
                            Ok(Ok(TerminalSignal::Completed)) => SlotResult::Completed,
                            Ok(Ok(TerminalSignal::Yielded { state })) => {
                                tracing::debug!(machine = %machine, state = %state, "pass yielded");
                                SlotResult::Yielded
                            }
                            Ok(Err(e)) => {
                                if e.is_transient() {
                                    tracing::warn!(machine = %machine, error = %e, "pass failed, retrying next round");
                                } else {
                                    tracing::error!(machine = %machine, error = %e, "pass failed");
                                }
                                SlotResult::Failed(e.to_string())
                            }
                            Err(_) => {
                                tracing::error!(machine = %machine, "pass panicked");
                                SlotResult::Failed("pass panicked".to_string())
                            }
                        };
                        (machine, result)
                    })
                    .collect()
            });

            for (machine, result) in results {
                match result {
                    SlotResult::Completed => report.completed.push(machine),
                    SlotResult::Yielded => report.yielded.push(machine),
                    SlotResult::Failed(message) => report.failed.push((machine, message)),
                }
            }
        }
        report
    }

    /// Run rounds until `stop` is set or `max_rounds` rounds ran, sleeping
    /// the scheduler frequency between rounds. Returns the number of rounds.
    pub fn run(&mut self, stop: &AtomicBool, max_rounds: Option<u64>) -> u64 {
        let mut rounds = 0u64;
        while !stop.load(Ordering::SeqCst) && max_rounds.map_or(true, |max| rounds < max) {
            let report = self.run_round();
            rounds += 1;
            tracing::info!(
                round = rounds,
                completed = report.completed.len(),
                yielded = report.yielded.len(),
                failed = report.failed.len(),
                "round finished"
            );
            if max_rounds.map_or(true, |max| rounds < max) && !stop.load(Ordering::SeqCst) {
                std::thread::sleep(self.config.scheduler_frequency());
            }
        }
        rounds
    }
}
