//! Execution event stream.
//!
//! The coordinator publishes immutable event records to every subscriber
//! in strict chronological order, at most once per transition. Events are
//! delivered over unbounded channels so publishing never blocks the run.

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::Mutex;

use super::step::{ExecutionProgress, ExecutionStep, RunCode};

/// Phase of the coordinator's run state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Idle,
    Validating,
    Generating,
    BackingUp,
    Executing,
    RollingBack,
    Completed,
    Failed,
}

/// One event on the stream
#[derive(Debug, Clone, Serialize)]
pub enum EngineEvent {
    /// The run moved to a new phase
    PhaseChanged { phase: RunPhase, at: DateTime<Utc> },
    /// A step changed status; carries an immutable snapshot
    StepChanged { step: ExecutionStep },
    /// Progress snapshot
    Progress { progress: ExecutionProgress },
    /// The run finished; no further events follow for this run
    Finished { code: RunCode, at: DateTime<Utc> },
}

/// Fan-out publisher for [`EngineEvent`]s
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    ///
    /// Events published after this call are delivered in order; events
    /// published before it are not replayed.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = unbounded();
        // A poisoned lock only means a publisher panicked; the list itself
        // is still usable.
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.push(tx);
        rx
    }

    /// Publish an event to all live subscribers
    ///
    /// Disconnected subscribers are dropped.
    pub fn publish(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        bus.publish(EngineEvent::PhaseChanged {
            phase: RunPhase::Validating,
            at: Utc::now(),
        });
        bus.publish(EngineEvent::PhaseChanged {
            phase: RunPhase::Generating,
            at: Utc::now(),
        });

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(matches!(
            first,
            EngineEvent::PhaseChanged {
                phase: RunPhase::Validating,
                ..
            }
        ));
        assert!(matches!(
            second,
            EngineEvent::PhaseChanged {
                phase: RunPhase::Generating,
                ..
            }
        ));
    }

    #[test]
    fn test_disconnected_subscribers_are_pruned() {
        let bus = EventBus::new();
        {
            let _rx = bus.subscribe();
            // Receiver dropped here.
        }
        bus.publish(EngineEvent::PhaseChanged {
            phase: RunPhase::Idle,
            at: Utc::now(),
        });
        let rx = bus.subscribe();
        bus.publish(EngineEvent::PhaseChanged {
            phase: RunPhase::Validating,
            at: Utc::now(),
        });
        assert_eq!(rx.len(), 1);
    }
}
