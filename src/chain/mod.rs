mod contract;

pub use contract::EvmChainClient;

pub use crate::error::ChainError;

use alloy::primitives::{Address, U256};

/// How a command's payload is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    /// Payload is the base64-encoded script body.
    Script = 0,
    /// Payload is a URL the script body is fetched from.
    Url = 1,
}

impl TryFrom<u8> for CommandKind {
    type Error = ChainError;

    fn try_from(raw: u8) -> Result<Self, ChainError> {
        match raw {
            0 => Ok(Self::Script),
            1 => Ok(Self::Url),
            other => Err(ChainError::decode(
                "command kind",
                format!("unknown command type {other}"),
            )),
        }
    }
}

/// An immutable unit of work assigned by the chain.
///
/// Created only by the contract, never locally; `id` is globally unique and
/// monotonically assigned, and its decimal string form is the ledger key.
#[derive(Debug, Clone)]
pub struct Command {
    pub id: U256,
    pub kind: CommandKind,
    pub payload: String,
    /// Chain-assigned creation time, typically Unix seconds.
    pub timestamp: U256,
    /// Address that triggered the command. Informational only.
    pub origin: Address,
    /// Correlation id assigned by the ops backend; logged, never interpreted.
    pub backend_command_id: String,
}

/// A decoded `CommandTriggered` log entry.
#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub command_id: U256,
    pub block_number: u64,
    pub timestamp: U256,
    pub kind: CommandKind,
    pub backend_command_id: String,
}

/// Read-only chain capability the poller depends on.
///
/// The poller is generic over this trait; tests substitute a scripted mock,
/// production wires in [`EvmChainClient`].
#[allow(async_fn_in_trait)]
pub trait ChainClient {
    /// Current head block height.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// All `CommandTriggered` events emitted by the watched contract in the
    /// inclusive block range, in chain-native order.
    async fn command_events(&self, from: u64, to: u64) -> Result<Vec<CommandEvent>, ChainError>;

    /// Full command record for an id, via a read-only contract call.
    async fn command(&self, id: U256) -> Result<Command, ChainError>;

    /// Highest command id assigned so far; zero means no commands exist.
    async fn latest_command_id(&self) -> Result<U256, ChainError>;
}
