//! Named event bus for pipeline notifications.
//!
//! Handlers run synchronously in registration order. A failing or panicking
//! handler is contained and later handlers still run; a handler returning
//! the veto sentinel short-circuits and the sentinel is returned to the
//! emitter (used by `beforeAction` to cancel an apply).

use crate::models::{ActionPlan, DecisionEntry, Diagnosis};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Per-event handler list bound.
pub const MAX_HANDLERS_PER_EVENT: usize = 100;

/// Events emitted by the controller during a tick, in deterministic order:
/// rollbacks, then alerts, then decisions, then after-action.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Decision(DecisionEntry),
    Alert(Diagnosis),
    Rollback(ActionPlan),
    BeforeAction(ActionPlan),
    AfterAction(ActionPlan),
    Custom {
        name: String,
        payload: serde_json::Value,
    },
}

impl BusEvent {
    pub fn name(&self) -> &str {
        match self {
            BusEvent::Decision(_) => "decision",
            BusEvent::Alert(_) => "alert",
            BusEvent::Rollback(_) => "rollback",
            BusEvent::BeforeAction(_) => "beforeAction",
            BusEvent::AfterAction(_) => "afterAction",
            BusEvent::Custom { name, .. } => name,
        }
    }
}

/// What a handler tells the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Continue,
    /// Short-circuits emission; the emitter sees the veto.
    Veto,
}

type Handler = Box<dyn Fn(&BusEvent) -> anyhow::Result<HandlerOutcome> + Send>;

#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<String, Vec<(String, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `(event, handler_id)`. Duplicate ids and
    /// full handler lists are no-ops returning `false`.
    pub fn on(
        &mut self,
        event: impl Into<String>,
        handler_id: impl Into<String>,
        handler: impl Fn(&BusEvent) -> anyhow::Result<HandlerOutcome> + Send + 'static,
    ) -> bool {
        let event = event.into();
        let handler_id = handler_id.into();
        let list = self.handlers.entry(event).or_default();
        if list.len() >= MAX_HANDLERS_PER_EVENT || list.iter().any(|(id, _)| *id == handler_id) {
            return false;
        }
        list.push((handler_id, Box::new(handler)));
        true
    }

    /// Removes a handler; returns whether anything was removed.
    pub fn off(&mut self, event: &str, handler_id: &str) -> bool {
        let Some(list) = self.handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| id != handler_id);
        list.len() != before
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map(|l| l.len()).unwrap_or(0)
    }

    /// Invokes handlers in registration order. Failures are contained; a
    /// veto short-circuits.
    pub fn emit(&self, event: &BusEvent) -> HandlerOutcome {
        let Some(list) = self.handlers.get(event.name()) else {
            return HandlerOutcome::Continue;
        };
        for (id, handler) in list {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(HandlerOutcome::Continue)) => {}
                Ok(Ok(HandlerOutcome::Veto)) => return HandlerOutcome::Veto,
                Ok(Err(err)) => {
                    warn!(event = event.name(), handler = %id, error = %err, "event handler failed");
                }
                Err(_) => {
                    warn!(event = event.name(), handler = %id, "event handler panicked");
                }
            }
        }
        HandlerOutcome::Continue
    }
}
