//! Orchestration event bus
//!
//! Publishes plan and task lifecycle events to subscribers over bounded
//! channels. Subscribers pick one event type or `All`. Publishing never
//! waits on a slow subscriber: when a channel is full the event is dropped
//! for that subscriber only.

use crate::conductor::types::{AgentTarget, PlanStatus, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    PlanStarted,
    TaskStarted,
    TaskFinished,
    PlanFinished,
    TurnRecorded,
    /// Subscribe to all event types
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PlanStarted {
        plan_id: String,
        session_id: String,
        task_count: usize,
    },
    TaskStarted {
        plan_id: String,
        task_id: String,
        agent: AgentTarget,
    },
    /// Terminal transition of a task, including skips and timeouts
    TaskFinished {
        plan_id: String,
        task_id: String,
        agent: AgentTarget,
        status: TaskStatus,
        duration_ms: Option<u64>,
    },
    PlanFinished {
        plan_id: String,
        status: PlanStatus,
        elapsed_ms: u64,
    },
    TurnRecorded {
        session_id: String,
        turn_index: u64,
        plan_id: String,
    },
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::PlanStarted { .. } => EventType::PlanStarted,
            Event::TaskStarted { .. } => EventType::TaskStarted,
            Event::TaskFinished { .. } => EventType::TaskFinished,
            Event::PlanFinished { .. } => EventType::PlanFinished,
            Event::TurnRecorded { .. } => EventType::TurnRecorded,
        }
    }
}

/// Pub/sub hub shared by orchestrators
pub struct MessageBus {
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to one event type, or `EventType::All`
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Deliver to subscribers of the event's type and of `All`
    ///
    /// Closed subscribers are pruned.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("Dropping {:?} event for a full subscriber", event_type);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
