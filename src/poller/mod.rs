use crate::chain::{ChainClient, Command, CommandEvent};
use crate::error::Result;
use crate::ledger::ExecutionLedger;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// The single callback invoked with each resolved command. Registered via
/// [`EventPoller::set_handler`]; invoked at most once per command id for the
/// lifetime of the ledger.
pub type CommandHandler = Box<dyn Fn(Command) -> HandlerFuture + Send + Sync>;

/// Discovers `CommandTriggered` events and turns each into exactly one
/// handler dispatch per command id, across restarts via the ledger.
///
/// The block watermark is in-memory only: it narrows discovery, while the
/// ledger alone decides whether a command was already handled. On restart the
/// watermark resets to the chain head and the startup catch-up covers
/// anything missed while offline.
pub struct EventPoller<C> {
    chain: C,
    ledger: Arc<ExecutionLedger>,
    interval: Duration,
    mark_on_handler_failure: bool,
    last_block: u64,
    handler: Option<CommandHandler>,
}

impl<C: ChainClient> EventPoller<C> {
    /// Build a poller with its watermark initialized to the current chain
    /// head, so only blocks mined after startup are scanned.
    pub async fn new(
        chain: C,
        ledger: Arc<ExecutionLedger>,
        interval: Duration,
        mark_on_handler_failure: bool,
    ) -> Result<Self> {
        let last_block = chain.block_number().await?;

        Ok(Self {
            chain,
            ledger,
            interval,
            mark_on_handler_failure,
            last_block,
            handler: None,
        })
    }

    /// Register the command handler. Without one, detected commands are
    /// marked executed but never run.
    pub fn set_handler(&mut self, handler: CommandHandler) {
        self.handler = Some(handler);
    }

    /// Highest block already scanned for events.
    pub fn last_scanned_block(&self) -> u64 {
        self.last_block
    }

    /// Startup catch-up: if the most recent on-chain command was never
    /// handled, deal with it before the periodic loop starts.
    ///
    /// On the very first run ever the command is marked WITHOUT dispatching;
    /// history predating the agent's first boot is intentionally not
    /// replayed. On a resumed run the command is fetched, dispatched once,
    /// and marked.
    pub async fn check_latest_unexecuted(&self) -> Result<()> {
        tracing::info!("checking for latest unexecuted command");

        let latest = self.chain.latest_command_id().await?;
        if latest.is_zero() {
            tracing::info!("no commands found in contract");
            return Ok(());
        }

        if self.ledger.is_executed(latest) {
            tracing::info!(command_id = %latest, "latest command already executed");
            return Ok(());
        }

        if self.ledger.is_first_run() {
            tracing::info!(
                command_id = %latest,
                "first run detected, marking latest command executed without running"
            );
            if let Err(e) = self.ledger.mark_executed(latest) {
                tracing::warn!(command_id = %latest, error = %e, "failed to mark command executed");
            }
            return Ok(());
        }

        tracing::info!(command_id = %latest, "found unexecuted command, executing now");
        let command = self.chain.command(latest).await?;
        self.dispatch_and_mark(command).await
    }

    /// Poll on a fixed interval until `shutdown` is cancelled. An in-flight
    /// tick always runs to completion; cancellation only prevents starting
    /// the next one.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(interval_ms = self.interval.as_millis(), "starting event poller");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if shutdown.is_cancelled() {
                break;
            }

            if let Err(e) = self.poll().await {
                tracing::warn!(error = %e, "poll tick failed");
            }
        }

        tracing::info!("stopping event poller");
        Ok(())
    }

    /// One scan tick. The watermark advances only after the whole range was
    /// scanned; a transport error leaves it untouched so the same range is
    /// retried next tick.
    pub async fn poll(&mut self) -> Result<()> {
        let head = self.chain.block_number().await?;
        if head <= self.last_block {
            return Ok(());
        }

        let from = self.last_block + 1;
        tracing::debug!(from, to = head, "scanning for command events");

        let events = self.chain.command_events(from, head).await?;
        for event in events {
            if let Err(e) = self.process_event(&event).await {
                tracing::error!(
                    command_id = %event.command_id,
                    error = %e,
                    "failed to process event"
                );
            }
        }

        self.last_block = head;
        Ok(())
    }

    async fn process_event(&self, event: &CommandEvent) -> Result<()> {
        if self.ledger.is_executed(event.command_id) {
            tracing::debug!(command_id = %event.command_id, "command already executed, skipping");
            return Ok(());
        }

        tracing::info!(
            command_id = %event.command_id,
            block = event.block_number,
            backend_command_id = %event.backend_command_id,
            "new command detected"
        );

        let command = self.chain.command(event.command_id).await?;
        self.dispatch_and_mark(command).await
    }

    async fn dispatch_and_mark(&self, command: Command) -> Result<()> {
        let id = command.id;

        let handler_ok = match &self.handler {
            Some(handler) => match handler(command).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(command_id = %id, error = %e, "command handler reported failure");
                    false
                }
            },
            None => {
                tracing::debug!(command_id = %id, "no handler registered, marking without execution");
                true
            }
        };

        if handler_ok || self.mark_on_handler_failure {
            self.ledger.mark_executed(id)?;
        }
        Ok(())
    }
}
