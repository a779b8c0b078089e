#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod chain;
pub mod config;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod poller;

pub use chain::{ChainClient, Command, CommandEvent, CommandKind, EvmChainClient};
pub use config::Config;
pub use error::{AgentError, Result};
pub use executor::{ExecutionOutcome, ScriptExecutor};
pub use ledger::ExecutionLedger;
pub use poller::EventPoller;
