//! Per-run event fan-out.
//!
//! Every agent reports progress through a [`RunEvents`] handle. Events land
//! in a bounded per-run history (served to late-joining pollers) and on a
//! broadcast channel for live subscribers. Delivery is best-effort: a
//! subscriber that lags simply misses events; nobody else is affected.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_BUFFER: usize = 256;

/// Entries kept per run for pollers that subscribe after the fact.
pub const HISTORY_LIMIT: usize = 50;

/// One structured progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub run_id: String,
    pub timestamp: String,
    pub event: String,
    pub agent: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

/// Process-wide bus multiplexing every run's events.
pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
    history: Mutex<HashMap<String, VecDeque<AgentEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_BUFFER);
        Self {
            sender,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the live stream. Events emitted before this call are only
    /// available through [`EventBus::history`].
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    /// Append to the run's history and fan out to live subscribers.
    pub fn emit(&self, event: AgentEvent) {
        {
            let mut history = self.history.lock().expect("event history poisoned");
            let entries = history.entry(event.run_id.clone()).or_default();
            if entries.len() == HISTORY_LIMIT {
                entries.pop_front();
            }
            entries.push_back(event.clone());
        }
        debug!(run_id = %event.run_id, event = %event.event, "event");
        // Send fails only when there are no live subscribers; history already
        // has the entry, so that is fine.
        let _ = self.sender.send(event);
    }

    /// Recent events for one run, oldest first.
    pub fn history(&self, run_id: &str) -> Vec<AgentEvent> {
        let history = self.history.lock().expect("event history poisoned");
        history
            .get(run_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Emission handle scoped to a single run and agent-agnostic.
#[derive(Clone)]
pub struct RunEvents {
    bus: Arc<EventBus>,
    run_id: String,
}

impl RunEvents {
    pub fn new(bus: Arc<EventBus>, run_id: impl Into<String>) -> Self {
        Self {
            bus,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, agent: &str, event: &str, message: impl Into<String>) {
        self.emit_inner(agent, event, message.into(), None, None);
    }

    pub fn emit_data(&self, agent: &str, event: &str, message: impl Into<String>, data: Value) {
        self.emit_inner(agent, event, message.into(), Some(data), None);
    }

    pub fn emit_progress(&self, agent: &str, event: &str, message: impl Into<String>, progress: u8) {
        self.emit_inner(agent, event, message.into(), None, Some(progress));
    }

    fn emit_inner(
        &self,
        agent: &str,
        event: &str,
        message: String,
        data: Option<Value>,
        progress: Option<u8>,
    ) {
        self.bus.emit(AgentEvent {
            run_id: self.run_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            agent: agent.to_string(),
            message,
            data,
            progress,
        });
    }
}
