use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// An event in a run's lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(run_id: RunId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id,
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of events emitted while a workflow runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    RunStarted {
        request_id: String,
        steps: usize,
    },
    WavefrontStarted {
        index: usize,
        steps: Vec<StepId>,
    },
    StepCompleted {
        step_id: StepId,
        published_keys: Vec<String>,
    },
    StepFailed {
        step_id: StepId,
        error: String,
    },
    RunCompleted {
        wavefronts: usize,
        duration_ms: u64,
    },
    RunFailed {
        error: String,
        duration_ms: u64,
    },
}

/// Event log writer trait
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event to the log
    async fn append(&self, event: Event) -> anyhow::Result<()>;

    /// Get all events for a run
    async fn get_run_events(&self, run_id: RunId) -> anyhow::Result<Vec<Event>>;
}

/// Event log kept in memory, grouped by run
#[derive(Default)]
pub struct InMemoryEventLog {
    events: RwLock<HashMap<RunId, Vec<Event>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every run that has logged at least one event
    pub async fn run_ids(&self) -> Vec<RunId> {
        self.events.read().await.keys().copied().collect()
    }
}

#[async_trait::async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: Event) -> anyhow::Result<()> {
        self.events
            .write()
            .await
            .entry(event.run_id)
            .or_default()
            .push(event);
        Ok(())
    }

    async fn get_run_events(&self, run_id: RunId) -> anyhow::Result<Vec<Event>> {
        Ok(self
            .events
            .read()
            .await
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_grouped_by_run() {
        let log = InMemoryEventLog::new();
        let run_a = RunId::new();
        let run_b = RunId::new();

        log.append(Event::new(
            run_a,
            EventType::RunStarted {
                request_id: "a".to_string(),
                steps: 2,
            },
        ))
        .await
        .unwrap();
        log.append(Event::new(
            run_b,
            EventType::RunFailed {
                error: "boom".to_string(),
                duration_ms: 1,
            },
        ))
        .await
        .unwrap();

        let events = log.get_run_events(run_a).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].event_type, EventType::RunStarted { steps: 2, .. }));
        assert_eq!(log.run_ids().await.len(), 2);
        assert!(log.get_run_events(RunId::new()).await.unwrap().is_empty());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = Event::new(
            RunId::new(),
            EventType::StepCompleted {
                step_id: StepId::new("node5"),
                published_keys: vec!["out".to_string()],
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"]["type"], "step_completed");
        assert_eq!(value["event_type"]["step_id"], "node5");
    }
}
