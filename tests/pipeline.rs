//! End-to-end pipeline scenarios: a scripted mock chain driving the real
//! poller, ledger, and script executor.

use alloy::primitives::{Address, U256};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chainwatch::chain::{ChainClient, Command, CommandEvent, CommandKind};
use chainwatch::error::ChainError;
use chainwatch::executor::ScriptExecutor;
use chainwatch::ledger::ExecutionLedger;
use chainwatch::poller::{CommandHandler, EventPoller};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct MockChain {
    head: AtomicU64,
    events: Mutex<Vec<CommandEvent>>,
    commands: Mutex<HashMap<String, Command>>,
    latest: Mutex<U256>,
}

impl MockChain {
    fn with_head(head: u64) -> Self {
        let chain = Self::default();
        chain.head.store(head, Ordering::SeqCst);
        chain
    }

    fn trigger_script_command(&self, id: u64, script: &str, block: u64) {
        let command = Command {
            id: U256::from(id),
            kind: CommandKind::Script,
            payload: BASE64.encode(script),
            timestamp: U256::from(1_700_000_000_u64),
            origin: Address::ZERO,
            backend_command_id: format!("backend-{id}"),
        };
        self.commands
            .lock()
            .unwrap()
            .insert(U256::from(id).to_string(), command);
        *self.latest.lock().unwrap() = U256::from(id);

        self.events.lock().unwrap().push(CommandEvent {
            command_id: U256::from(id),
            block_number: block,
            timestamp: U256::from(1_700_000_000_u64),
            kind: CommandKind::Script,
            backend_command_id: format!("backend-{id}"),
        });
        self.head.store(block, Ordering::SeqCst);
    }
}

impl ChainClient for &MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn command_events(&self, from: u64, to: u64) -> Result<Vec<CommandEvent>, ChainError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.block_number >= from && e.block_number <= to)
            .cloned()
            .collect())
    }

    async fn command(&self, id: U256) -> Result<Command, ChainError> {
        self.commands
            .lock()
            .unwrap()
            .get(&id.to_string())
            .cloned()
            .ok_or_else(|| ChainError::rpc(format!("getCommand({id})"), "unknown id"))
    }

    async fn latest_command_id(&self) -> Result<U256, ChainError> {
        Ok(*self.latest.lock().unwrap())
    }
}

fn executor_handler(executor: Arc<ScriptExecutor>) -> CommandHandler {
    Box::new(move |command| {
        let executor = Arc::clone(&executor);
        Box::pin(async move {
            let outcome = executor.execute(&command).await;
            if outcome.succeeded {
                Ok(())
            } else {
                anyhow::bail!(outcome.error.unwrap_or_else(|| "unknown failure".into()))
            }
        })
    })
}

fn real_executor() -> Arc<ScriptExecutor> {
    Arc::new(ScriptExecutor::new(Duration::from_secs(10), 1).unwrap())
}

#[tokio::test]
async fn event_flows_through_to_an_executed_script() {
    let state = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let marker = workspace.path().join("ran.txt");

    let chain = MockChain::with_head(100);
    let ledger = Arc::new(ExecutionLedger::open(state.path().join("executed.json")).unwrap());

    let mut poller = EventPoller::new(&chain, Arc::clone(&ledger), Duration::from_millis(10), true)
        .await
        .unwrap();
    poller.set_handler(executor_handler(real_executor()));

    chain.trigger_script_command(1, &format!("echo done > {}", marker.display()), 101);
    poller.poll().await.unwrap();

    assert!(marker.exists(), "script side effect missing");
    assert!(ledger.is_executed(U256::from(1)));
    assert_eq!(ledger.highest_seen_id(), U256::from(1));
}

#[tokio::test]
async fn command_is_never_redelivered_across_restarts() {
    let state = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let counter = workspace.path().join("count.txt");
    let script = format!("echo x >> {}", counter.display());

    let chain = MockChain::with_head(100);

    // First agent lifetime: handle command 1.
    {
        let ledger = Arc::new(ExecutionLedger::open(state.path().join("executed.json")).unwrap());
        let mut poller =
            EventPoller::new(&chain, Arc::clone(&ledger), Duration::from_millis(10), true)
                .await
                .unwrap();
        poller.set_handler(executor_handler(real_executor()));

        chain.trigger_script_command(1, &script, 101);
        poller.poll().await.unwrap();
    }

    // Restart: same persisted ledger, fresh poller. The old event is still
    // in the log and the startup catch-up sees the same latest id.
    {
        let ledger = Arc::new(ExecutionLedger::open(state.path().join("executed.json")).unwrap());
        assert!(!ledger.is_first_run());

        let mut poller =
            EventPoller::new(&chain, Arc::clone(&ledger), Duration::from_millis(10), true)
                .await
                .unwrap();
        poller.set_handler(executor_handler(real_executor()));

        poller.check_latest_unexecuted().await.unwrap();

        // A reorg-free chain never re-emits, but force a rescan anyway.
        chain.head.store(99, Ordering::SeqCst);
        let mut poller2 =
            EventPoller::new(&chain, Arc::clone(&ledger), Duration::from_millis(10), true)
                .await
                .unwrap();
        poller2.set_handler(executor_handler(real_executor()));
        chain.head.store(102, Ordering::SeqCst);
        poller2.poll().await.unwrap();
    }

    let runs = std::fs::read_to_string(&counter).unwrap().lines().count();
    assert_eq!(runs, 1, "command executed more than once");
}

#[tokio::test]
async fn first_boot_marks_existing_command_without_running_it() {
    let state = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let marker = workspace.path().join("should-not-exist.txt");

    let chain = MockChain::with_head(100);
    chain.trigger_script_command(7, &format!("echo bad > {}", marker.display()), 90);

    let ledger = Arc::new(ExecutionLedger::open(state.path().join("executed.json")).unwrap());
    assert!(ledger.is_first_run());

    let mut poller = EventPoller::new(&chain, Arc::clone(&ledger), Duration::from_millis(10), true)
        .await
        .unwrap();
    poller.set_handler(executor_handler(real_executor()));

    poller.check_latest_unexecuted().await.unwrap();

    assert!(!marker.exists(), "first-run catch-up must not execute history");
    assert!(ledger.is_executed(U256::from(7)));
}

#[tokio::test]
async fn resumed_agent_executes_the_command_it_missed() {
    let state = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let marker = workspace.path().join("missed.txt");

    // Previous lifetime handled 1..=3.
    {
        let ledger = ExecutionLedger::open(state.path().join("executed.json")).unwrap();
        for id in 1..=3_u64 {
            ledger.mark_executed(U256::from(id)).unwrap();
        }
    }

    let chain = MockChain::with_head(100);
    chain.trigger_script_command(4, &format!("echo caught-up > {}", marker.display()), 95);

    let ledger = Arc::new(ExecutionLedger::open(state.path().join("executed.json")).unwrap());
    let mut poller = EventPoller::new(&chain, Arc::clone(&ledger), Duration::from_millis(10), true)
        .await
        .unwrap();
    poller.set_handler(executor_handler(real_executor()));

    poller.check_latest_unexecuted().await.unwrap();

    assert!(marker.exists(), "missed command was not executed on resume");
    assert!(ledger.is_executed(U256::from(4)));
}

#[tokio::test]
async fn failed_script_still_marks_the_command_under_default_policy() {
    let state = TempDir::new().unwrap();

    let chain = MockChain::with_head(100);
    let ledger = Arc::new(ExecutionLedger::open(state.path().join("executed.json")).unwrap());

    let mut poller = EventPoller::new(&chain, Arc::clone(&ledger), Duration::from_millis(10), true)
        .await
        .unwrap();
    poller.set_handler(executor_handler(real_executor()));

    chain.trigger_script_command(5, "exit 3", 101);
    poller.poll().await.unwrap();

    assert!(ledger.is_executed(U256::from(5)));
}
