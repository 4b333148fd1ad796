//! Autonomous economy regulator.
//!
//! A closed-loop controller for multi-agent economies: it observes state
//! snapshots and event streams, diagnoses violations of a pluggable library
//! of economic principles, Monte-Carlo validates candidate corrections, and
//! applies small, cooldown-bounded parameter adjustments through a host
//! adapter, rolling back automatically if satisfaction degrades.
//!
//! Embed a [`controller::Controller`] behind your own [`adapter::HostAdapter`],
//! or run the `regulatord` binary for the HTTP + WebSocket shell.

pub mod adapter;
pub mod api;
pub mod bus;
pub mod config;
pub mod controller;
pub mod decision_log;
pub mod diagnoser;
pub mod error;
pub mod executor;
pub mod metric_store;
pub mod middleware;
pub mod models;
pub mod observer;
pub mod persona;
pub mod planner;
pub mod principles;
pub mod registry;
pub mod satisfaction;
pub mod simulator;
pub mod validation;

pub use adapter::{HostAdapter, SimHostAdapter};
pub use config::{Mode, RegulatorConfig, Thresholds, TransportConfig};
pub use controller::{Controller, TickReport};
pub use error::RegulatorError;
