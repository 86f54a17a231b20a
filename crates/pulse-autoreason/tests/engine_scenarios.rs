//! End-to-end runs of auto-reason extensions against the in-memory store,
//! from a single extension run up to scheduled activity passes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use pulse_analysis::{
    build_activity_pipeline, InMemoryServices, MachineActivityAnalysis, Scheduler,
};
use pulse_autoreason::{
    AutoReasonConfig, AutoReasonDefinition, AutoReasonError, AutoReasonRegistry, AutoReasonRule,
    CheckContext, CycleEndRule, DynamicTimeResponse, ExtensionEnv, ExtensionPhase, LongIdleRule,
    ScriptedResolver, YamlConfigurationProvider,
};
use pulse_core::{Clock, EngineConfig, Machine, MachineId, ManualClock, UtcRange};
use pulse_state::Budget;
use pulse_store::{CheckpointKey, Cycle, Fact, InMemoryStore, MachineMode, StoreError};

const M: MachineId = MachineId(1);

fn t(min: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(min)
}

struct Fixture {
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    resolver: Arc<ScriptedResolver>,
    config: Arc<EngineConfig>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            clock: Arc::new(ManualClock::new(t(120))),
            resolver: Arc::new(ScriptedResolver::new()),
            config: Arc::new(EngineConfig::default()),
        }
    }

    fn env(&self) -> ExtensionEnv {
        ExtensionEnv::new(
            self.store.clone(),
            self.clock.clone(),
            self.resolver.clone(),
            &self.config,
        )
    }

    fn cycle_end(&self, minute: i64) {
        self.store.insert_cycle(Cycle {
            machine: M,
            module: None,
            begin: None,
            end: t(minute),
        });
    }

    fn context(&self) -> MachineActivityAnalysis {
        MachineActivityAnalysis::new(
            Machine::new(M, "press"),
            self.store.clone(),
            Arc::new(InMemoryServices::new(
                self.clock.clone(),
                self.config.past_modifications_age(),
            )),
            self.clock.clone(),
            self.config.clone(),
        )
    }

    fn checkpoint(&self, prefix: &str) -> Option<DateTime<Utc>> {
        self.store.checkpoint(&CheckpointKey::machine(M, prefix))
    }
}

fn instance(name: &str) -> AutoReasonConfig {
    AutoReasonConfig {
        instance: name.to_string(),
        default_reason_key: Some("AutoStop".to_string()),
        start: Some(t(0)),
        ..AutoReasonConfig::default()
    }
}

// ── checkpoint scenarios ─────────────────────────────────────────────

#[test]
fn test_cycle_end_after_checkpoint_is_applied_and_checkpoint_moves_to_it() {
    let fx = Fixture::new();
    fx.cycle_end(10);
    let mut ext = AutoReasonDefinition::new(Arc::new(CycleEndRule), instance("a"))
        .initialize(&Machine::new(M, "press"), &fx.env())
        .unwrap()
        .unwrap();
    assert_eq!(ext.checkpoint(), t(0));

    assert_eq!(ext.run_once().unwrap(), ExtensionPhase::Applied);

    let assignments = fx.store.assignments(M);
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].range, UtcRange::since(t(10)));
    assert_eq!(assignments[0].origin, "CycleEnd.a");
    assert_eq!(ext.checkpoint(), t(10));
    assert_eq!(fx.checkpoint("CycleEnd.a"), Some(t(10)));

    assert_eq!(ext.run_once().unwrap(), ExtensionPhase::NoWork);
    assert_eq!(ext.checkpoint(), t(10));
}

#[test]
fn test_no_data_postpones_without_touching_checkpoint() {
    let fx = Fixture::new();
    fx.cycle_end(10);
    fx.resolver
        .script("NextProduction", M, DynamicTimeResponse::no_data());
    let config = AutoReasonConfig {
        dynamic_end: "NextProduction".to_string(),
        ..instance("a")
    };
    let mut ext = AutoReasonDefinition::new(Arc::new(CycleEndRule), config)
        .initialize(&Machine::new(M, "press"), &fx.env())
        .unwrap()
        .unwrap();

    assert_eq!(ext.run_once().unwrap(), ExtensionPhase::Postponed);
    assert_eq!(ext.checkpoint(), t(0));
    assert_eq!(fx.checkpoint("CycleEnd.a"), None);
    assert!(fx.store.assignments(M).is_empty());

    // The same boundary is retried once the resolver can answer.
    fx.resolver
        .script("NextProduction", M, DynamicTimeResponse::final_at(t(25)));
    assert_eq!(ext.run_once().unwrap(), ExtensionPhase::Applied);
    let assignments = fx.store.assignments(M);
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].range, UtcRange::between(t(10), t(25)).unwrap());
    assert_eq!(assignments[0].requested_range, UtcRange::since(t(10)));
    assert_eq!(ext.checkpoint(), t(10));
}

#[test]
fn test_reapplying_after_reset_keeps_one_assignment() {
    let fx = Fixture::new();
    fx.cycle_end(10);
    let mut ext = AutoReasonDefinition::new(Arc::new(CycleEndRule), instance("a"))
        .initialize(&Machine::new(M, "press"), &fx.env())
        .unwrap()
        .unwrap();
    ext.run_once().unwrap();
    let first = fx.store.assignments(M);

    ext.reset_date_time(t(0)).unwrap();
    assert_eq!(fx.checkpoint("CycleEnd.a"), Some(t(0)));
    assert_eq!(ext.run_once().unwrap(), ExtensionPhase::Applied);

    assert_eq!(fx.store.assignments(M), first);
    assert_eq!(ext.checkpoint(), t(10));
}

#[test]
fn test_instances_with_different_reasons_keep_their_own_assignment() {
    let fx = Fixture::new();
    fx.cycle_end(10);
    let machine = Machine::new(M, "press");
    let mut after_cycle = AutoReasonDefinition::new(
        Arc::new(CycleEndRule),
        AutoReasonConfig {
            default_reason_key: Some("AfterCycle".to_string()),
            ..instance("a")
        },
    )
    .initialize(&machine, &fx.env())
    .unwrap()
    .unwrap();
    let mut setup = AutoReasonDefinition::new(
        Arc::new(CycleEndRule),
        AutoReasonConfig {
            default_reason_key: Some("Setup".to_string()),
            overwrite_required: true,
            ..instance("b")
        },
    )
    .initialize(&machine, &fx.env())
    .unwrap()
    .unwrap();
    assert_ne!(after_cycle.reason(), setup.reason());

    assert_eq!(after_cycle.run_once().unwrap(), ExtensionPhase::Applied);
    assert_eq!(setup.run_once().unwrap(), ExtensionPhase::Applied);
    setup.reset_date_time(t(0)).unwrap();
    assert_eq!(setup.run_once().unwrap(), ExtensionPhase::Applied);

    let mut stored: Vec<(String, _)> = fx
        .store
        .assignments(M)
        .into_iter()
        .map(|a| {
            assert_eq!(a.requested_range, UtcRange::since(t(10)));
            (a.origin, a.reason)
        })
        .collect();
    stored.sort();
    assert_eq!(
        stored,
        vec![
            ("CycleEnd.a".to_string(), after_cycle.reason()),
            ("CycleEnd.b".to_string(), setup.reason()),
        ]
    );
}

#[test]
fn test_aggressive_instance_skips_period_whose_dynamic_end_shrinks() {
    let fx = Fixture::new();
    fx.store.upsert_fact(Fact {
        machine: M,
        range: UtcRange::between(t(20), t(50)).unwrap(),
        mode: MachineMode::Stopped,
    });
    fx.resolver
        .script("ShiftEnd", M, DynamicTimeResponse::final_at(t(40)));
    let config = AutoReasonConfig {
        dynamic_end: "ShiftEnd".to_string(),
        aggressive: true,
        ..instance("a")
    };
    let mut ext = AutoReasonDefinition::new(Arc::new(LongIdleRule), config)
        .initialize(&Machine::new(M, "press"), &fx.env())
        .unwrap()
        .unwrap();

    assert_eq!(ext.run_once().unwrap(), ExtensionPhase::Applied);
    assert!(fx.store.assignments(M).is_empty());
    assert_eq!(ext.checkpoint(), t(20));
}

#[test]
fn test_failed_commit_leaves_everything_for_the_next_attempt() {
    let fx = Fixture::new();
    fx.cycle_end(10);
    let mut ext = AutoReasonDefinition::new(Arc::new(CycleEndRule), instance("a"))
        .initialize(&Machine::new(M, "press"), &fx.env())
        .unwrap()
        .unwrap();
    fx.store.fail_next_commit(StoreError::Unavailable("db restarting".into()));

    let err = ext.run_once().unwrap_err();
    assert!(err.is_transient());
    assert!(fx.store.assignments(M).is_empty());
    assert_eq!(fx.checkpoint("CycleEnd.a"), None);
    assert_eq!(ext.checkpoint(), t(0));

    assert_eq!(ext.run_once().unwrap(), ExtensionPhase::Applied);
    assert_eq!(fx.store.assignments(M).len(), 1);
    assert_eq!(ext.checkpoint(), t(10));
}

// ── pipeline scenarios ───────────────────────────────────────────────

fn provider(entries: &[(&str, AutoReasonConfig)]) -> Arc<YamlConfigurationProvider> {
    let mut plugins: BTreeMap<String, Vec<AutoReasonConfig>> = BTreeMap::new();
    for (plugin, config) in entries {
        plugins
            .entry(plugin.to_string())
            .or_default()
            .push(config.clone());
    }
    Arc::new(YamlConfigurationProvider::new(plugins))
}

#[test]
fn test_extensions_are_visited_by_descending_priority() {
    let fx = Fixture::new();
    let entries: Vec<(&str, AutoReasonConfig)> = [5, 1, 10]
        .into_iter()
        .map(|p| {
            (
                "CycleEnd",
                AutoReasonConfig {
                    priority: p,
                    ..instance(&format!("p{p}"))
                },
            )
        })
        .collect();
    let registry =
        AutoReasonRegistry::with_builtin_rules(fx.resolver.clone(), provider(&entries));
    let ctx = fx.context().with_registry(Arc::new(registry));
    let names: Vec<String> = ctx
        .extension_states()
        .unwrap()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(names, vec!["CycleEnd.p10", "CycleEnd.p5", "CycleEnd.p1"]);
}

/// Rule whose check consumes a whole day of the manual clock.
#[derive(Debug)]
struct SlowRule {
    clock: Arc<ManualClock>,
}

impl AutoReasonRule for SlowRule {
    fn plugin_key(&self) -> &str {
        "Slow"
    }

    fn check(&self, cx: &mut CheckContext<'_>) -> Result<(), AutoReasonError> {
        self.clock.advance(Duration::days(1));
        let now = cx.now();
        cx.go_on(now);
        Ok(())
    }
}

#[test]
fn test_extension_over_budget_stops_the_composite() {
    let fx = Fixture::new();
    fx.cycle_end(10);
    let entries = [
        (
            "Slow",
            AutoReasonConfig {
                priority: 10,
                ..instance("a")
            },
        ),
        (
            "CycleEnd",
            AutoReasonConfig {
                priority: 5,
                ..instance("b")
            },
        ),
    ];
    let registry = AutoReasonRegistry::with_builtin_rules(fx.resolver.clone(), provider(&entries))
        .with_rule(Arc::new(SlowRule {
            clock: fx.clock.clone(),
        }));
    let mut ctx = fx.context().with_registry(Arc::new(registry));
    let mut pipeline = build_activity_pipeline(&ctx).unwrap();
    let clock: Arc<dyn Clock> = fx.clock.clone();
    let budget = Budget::start(clock, fx.config.pass_max_time());

    pipeline.run(&mut ctx, &budget).unwrap();

    assert_eq!(fx.checkpoint("Slow.a"), Some(t(120)));
    assert_eq!(fx.checkpoint("CycleEnd.b"), None);
    assert!(fx.store.assignments(M).is_empty());
}

#[test]
fn test_scheduled_rounds_drain_cycle_backlog_of_every_machine() {
    let fx = Fixture::new();
    let machines = [MachineId(1), MachineId(2), MachineId(3)];
    for machine in machines {
        for minute in [10, 30, 50] {
            fx.store.insert_cycle(Cycle {
                machine,
                module: None,
                begin: None,
                end: t(minute),
            });
        }
    }
    let provider = provider(&[("CycleEnd", instance("a"))]);
    let config = Arc::new(EngineConfig {
        max_parallel_machines: 2,
        ..EngineConfig::default()
    });
    let mut scheduler = Scheduler::new(config.clone(), fx.clock.clone());
    for machine in machines {
        let registry =
            AutoReasonRegistry::with_builtin_rules(fx.resolver.clone(), provider.clone());
        let ctx = MachineActivityAnalysis::new(
            Machine::new(machine, format!("press-{}", machine.0)),
            fx.store.clone(),
            Arc::new(InMemoryServices::new(
                fx.clock.clone(),
                config.past_modifications_age(),
            )),
            fx.clock.clone(),
            config.clone(),
        )
        .with_registry(Arc::new(registry));
        assert!(scheduler.add_machine(ctx).unwrap());
    }

    let report = scheduler.run_round();
    assert_eq!(report.completed.len(), 3);
    assert!(report.failed.is_empty());

    for machine in machines {
        assert_eq!(fx.store.assignments(machine).len(), 3);
        assert_eq!(
            fx.store
                .checkpoint(&CheckpointKey::machine(machine, "CycleEnd.a")),
            Some(t(50))
        );
    }

    // Nothing new: the next round changes nothing.
    scheduler.run_round();
    for machine in machines {
        assert_eq!(fx.store.assignments(machine).len(), 3);
    }
}

// ── properties ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn test_committed_checkpoints_strictly_increase(
        ends in proptest::collection::vec(1i64..240, 0..20),
    ) {
        let fx = Fixture::new();
        for &minute in &ends {
            fx.cycle_end(minute);
        }
        let mut ext = AutoReasonDefinition::new(Arc::new(CycleEndRule), instance("a"))
            .initialize(&Machine::new(M, "press"), &fx.env())
            .unwrap()
            .unwrap();

        let mut seen = vec![ext.checkpoint()];
        for _ in 0..64 {
            match ext.run_once().unwrap() {
                ExtensionPhase::Applied => seen.push(ext.checkpoint()),
                _ => break,
            }
        }

        prop_assert!(seen.windows(2).all(|w| w[0] < w[1]));
        let mut distinct = ends.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(fx.store.assignments(M).len(), distinct.len());
    }
}
