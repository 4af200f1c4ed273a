//! Event stream ordering and delivery guarantees.

mod common;

use common::MockBackend;
use schemaguard::catalog::{ColumnDefinition, SchemaCatalog, TableDefinition};
use schemaguard::{
    EngineEvent, ExecutionCoordinator, RunCode, RunOptions, RunPhase, StepStatus,
};

fn two_table_catalog() -> SchemaCatalog {
    SchemaCatalog::new()
        .table(
            TableDefinition::new("alpha")
                .column(ColumnDefinition::new("id", "UUID").primary_key()),
        )
        .table(
            TableDefinition::new("beta")
                .column(ColumnDefinition::new("id", "UUID").primary_key()),
        )
}

#[test]
fn test_events_cover_the_run_in_chronological_order() {
    let catalog = two_table_catalog();
    let backend = MockBackend::empty(&catalog);
    let coordinator = ExecutionCoordinator::new(&catalog, &backend);
    let rx = coordinator.subscribe();

    let result = coordinator.run_full_setup(RunOptions::default()).unwrap();
    assert!(result.success);

    let events: Vec<EngineEvent> = rx.try_iter().collect();
    assert!(!events.is_empty());

    // The stream opens with the validating phase and closes with the
    // finished marker.
    assert!(matches!(
        events.first().unwrap(),
        EngineEvent::PhaseChanged {
            phase: RunPhase::Validating,
            ..
        }
    ));
    assert!(matches!(
        events.last().unwrap(),
        EngineEvent::Finished {
            code: RunCode::Completed,
            ..
        }
    ));

    // Each step reports Running before Completed.
    for name in ["create_table_alpha", "create_table_beta"] {
        let running = events.iter().position(|e| {
            matches!(e, EngineEvent::StepChanged { step }
                if step.name == name && step.status == StepStatus::Running)
        });
        let completed = events.iter().position(|e| {
            matches!(e, EngineEvent::StepChanged { step }
                if step.name == name && step.status == StepStatus::Completed)
        });
        assert!(
            running.unwrap() < completed.unwrap(),
            "step '{name}' must run before it completes"
        );
    }

    // Progress percentages never decrease.
    let percents: Vec<f32> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Progress { progress } => Some(progress.percent),
            _ => None,
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*percents.last().unwrap(), 100.0);
}

#[test]
fn test_each_transition_is_delivered_at_most_once() {
    let catalog = two_table_catalog();
    let backend = MockBackend::empty(&catalog);
    let coordinator = ExecutionCoordinator::new(&catalog, &backend);
    let rx = coordinator.subscribe();

    coordinator.run_full_setup(RunOptions::default()).unwrap();

    let mut seen = std::collections::HashSet::new();
    for event in rx.try_iter() {
        if let EngineEvent::StepChanged { step } = event {
            assert!(
                seen.insert((step.name.clone(), step.status)),
                "duplicate transition for '{}' ({})",
                step.name,
                step.status
            );
        }
    }
    assert!(!seen.is_empty());
}

#[test]
fn test_late_subscribers_see_only_later_runs() {
    let catalog = two_table_catalog();
    let backend = MockBackend::empty(&catalog);
    let coordinator = ExecutionCoordinator::new(&catalog, &backend);

    coordinator.run_full_setup(RunOptions::default()).unwrap();

    // Subscribed after the first run: nothing is replayed.
    let rx = coordinator.subscribe();
    assert_eq!(rx.try_iter().count(), 0);

    let second = coordinator.run_full_setup(RunOptions::default()).unwrap();
    assert_eq!(second.code, RunCode::NoActionNeeded);
    let events: Vec<EngineEvent> = rx.try_iter().collect();
    assert!(matches!(
        events.last().unwrap(),
        EngineEvent::Finished {
            code: RunCode::NoActionNeeded,
            ..
        }
    ));
}

#[test]
fn test_failed_run_emits_failed_step_and_finished_marker() {
    let catalog = two_table_catalog();
    let backend = MockBackend::empty(&catalog);
    backend.set_fail_on("CREATE TABLE IF NOT EXISTS beta");
    let coordinator = ExecutionCoordinator::new(&catalog, &backend);
    let rx = coordinator.subscribe();

    let result = coordinator.run_full_setup(RunOptions::default()).unwrap();
    assert!(!result.success);

    let events: Vec<EngineEvent> = rx.try_iter().collect();
    assert!(events.iter().any(|e| {
        matches!(e, EngineEvent::StepChanged { step }
            if step.name == "create_table_beta" && step.status == StepStatus::Failed)
    }));
    assert!(events.iter().any(|e| {
        matches!(
            e,
            EngineEvent::PhaseChanged {
                phase: RunPhase::RollingBack,
                ..
            }
        )
    }));
    assert!(matches!(
        events.last().unwrap(),
        EngineEvent::Finished {
            code: RunCode::ExecutionFailed,
            ..
        }
    ));
}
