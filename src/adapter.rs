//! Host adapter interface.
//!
//! The host economy is reached exclusively through this trait; both calls may
//! be remote and are the only suspension points inside a tick. `set_param`
//! must be idempotent across identical `(key, value, scope)` triples because
//! a rollback can re-issue the same revert.

use crate::error::RegulatorError;
use crate::models::{EconomicEvent, EconomyState, ParameterScope};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

#[async_trait]
pub trait HostAdapter: Send + Sync {
    async fn get_state(&self) -> Result<EconomyState, RegulatorError>;

    async fn set_param(
        &self,
        key: &str,
        value: f64,
        scope: Option<&ParameterScope>,
    ) -> Result<(), RegulatorError>;

    /// Optional push channel for host events. The controller takes the
    /// receiver once at construction and drains it into its ingest buffer at
    /// the start of every tick.
    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<EconomicEvent>> {
        None
    }
}

/// Record of one `set_param` call, kept by the sim adapter for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamCall {
    pub key: String,
    pub value: f64,
    pub scope: Option<ParameterScope>,
}

/// In-memory host used by the demo binary and the test suite. Holds a state
/// snapshot the caller mutates between ticks, records every parameter write
/// in order, and can push events at the controller.
pub struct SimHostAdapter {
    state: Mutex<EconomyState>,
    params: Mutex<HashMap<String, f64>>,
    calls: Mutex<Vec<ParamCall>>,
    events_tx: mpsc::UnboundedSender<EconomicEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EconomicEvent>>>,
    /// When set, every `set_param` fails; used to exercise failure paths.
    pub fail_set_param: Mutex<bool>,
}

impl Default for SimHostAdapter {
    fn default() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(EconomyState::default()),
            params: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            fail_set_param: Mutex::new(false),
        }
    }
}

impl SimHostAdapter {
    pub fn new(state: EconomyState) -> Self {
        let adapter = Self::default();
        *adapter.state.lock() = state;
        adapter
    }

    /// Pushes an event at the controller's ingest path.
    pub fn push_event(&self, event: EconomicEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn put_state(&self, state: EconomyState) {
        *self.state.lock() = state;
    }

    pub fn param(&self, key: &str) -> Option<f64> {
        self.params.lock().get(key).copied()
    }

    pub fn calls(&self) -> Vec<ParamCall> {
        self.calls.lock().clone()
    }

    pub fn last_call_for(&self, key: &str) -> Option<ParamCall> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| c.key == key)
            .cloned()
    }
}

#[async_trait]
impl HostAdapter for SimHostAdapter {
    async fn get_state(&self) -> Result<EconomyState, RegulatorError> {
        Ok(self.state.lock().clone())
    }

    async fn set_param(
        &self,
        key: &str,
        value: f64,
        scope: Option<&ParameterScope>,
    ) -> Result<(), RegulatorError> {
        if *self.fail_set_param.lock() {
            return Err(RegulatorError::AdapterFailure(format!(
                "set_param({key}) refused"
            )));
        }
        debug!(key, value, "sim adapter set_param");
        self.params.lock().insert(key.to_string(), value);
        self.calls.lock().push(ParamCall {
            key: key.to_string(),
            value,
            scope: scope.cloned(),
        });
        Ok(())
    }

    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<EconomicEvent>> {
        self.events_rx.lock().take()
    }
}
