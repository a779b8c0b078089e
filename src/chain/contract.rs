use super::{ChainClient, Command, CommandEvent, CommandKind};
use crate::error::ChainError;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::sol;
use alloy::sol_types::SolEvent;

// Read surface of the DeviceControl contract. The agent never writes; the
// Trigger/admin side lives with the backend.
sol! {
    #[sol(rpc)]
    contract DeviceControl {
        event CommandTriggered(
            uint256 indexed commandId,
            uint256 timestamp,
            uint8 commandType,
            string backendCommandId
        );

        function getCommand(uint256 commandId)
            external
            view
            returns (
                uint256 id,
                uint8 commandType,
                string data,
                uint256 timestamp,
                address triggeredBy,
                string backendCommandId
            );

        function getLatestCommandId() external view returns (uint256);
    }
}

/// JSON-RPC implementation of [`ChainClient`] for EVM-compatible chains.
pub struct EvmChainClient {
    provider: DynProvider,
    contract: Address,
}

impl EvmChainClient {
    pub fn connect(rpc_url: &str, contract: Address) -> Result<Self, ChainError> {
        let url: url::Url = rpc_url.parse().map_err(|e| ChainError::Connect {
            url: rpc_url.to_string(),
            message: format!("invalid URL: {e}"),
        })?;
        let provider = ProviderBuilder::new().connect_http(url);

        Ok(Self {
            provider: DynProvider::new(provider),
            contract,
        })
    }

    pub fn parse_contract_address(raw: &str) -> Result<Address, ChainError> {
        raw.trim()
            .parse::<Address>()
            .map_err(|e| ChainError::InvalidAddress(format!("{raw}: {e}")))
    }

    fn bindings(&self) -> DeviceControl::DeviceControlInstance<DynProvider> {
        DeviceControl::new(self.contract, self.provider.clone())
    }
}

impl ChainClient for EvmChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::rpc("block number query", e))
    }

    async fn command_events(&self, from: u64, to: u64) -> Result<Vec<CommandEvent>, ChainError> {
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(DeviceControl::CommandTriggered::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::rpc(format!("log filter [{from}, {to}]"), e))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let decoded = log
                .log_decode::<DeviceControl::CommandTriggered>()
                .map_err(|e| ChainError::decode("CommandTriggered event", e))?;
            let data = decoded.inner.data;

            events.push(CommandEvent {
                command_id: data.commandId,
                block_number: log.block_number.unwrap_or_default(),
                timestamp: data.timestamp,
                kind: CommandKind::try_from(data.commandType)?,
                backend_command_id: data.backendCommandId,
            });
        }

        Ok(events)
    }

    async fn command(&self, id: U256) -> Result<Command, ChainError> {
        let ret = self
            .bindings()
            .getCommand(id)
            .call()
            .await
            .map_err(|e| ChainError::rpc(format!("getCommand({id})"), e))?;

        Ok(Command {
            id: ret.id,
            kind: CommandKind::try_from(ret.commandType)?,
            payload: ret.data,
            timestamp: ret.timestamp,
            origin: ret.triggeredBy,
            backend_command_id: ret.backendCommandId,
        })
    }

    async fn latest_command_id(&self) -> Result<U256, ChainError> {
        self.bindings()
            .getLatestCommandId()
            .call()
            .await
            .map_err(|e| ChainError::rpc("getLatestCommandId", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;

    #[test]
    fn event_topic_matches_signature() {
        assert_eq!(
            DeviceControl::CommandTriggered::SIGNATURE,
            "CommandTriggered(uint256,uint256,uint8,string)"
        );
        assert_eq!(
            DeviceControl::CommandTriggered::SIGNATURE_HASH,
            keccak256("CommandTriggered(uint256,uint256,uint8,string)".as_bytes())
        );
    }

    #[test]
    fn contract_address_parsing() {
        let addr =
            EvmChainClient::parse_contract_address(" 0x1e8678A15DAf23C01d0A972D86F5D692469D392c ")
                .unwrap();
        assert_eq!(
            addr.to_string().to_lowercase(),
            "0x1e8678a15daf23c01d0a972d86f5d692469d392c"
        );

        assert!(EvmChainClient::parse_contract_address("not-an-address").is_err());
    }

    #[test]
    fn connect_rejects_malformed_url() {
        let contract = Address::ZERO;
        let err = EvmChainClient::connect("not a url", contract)
            .map(|_| ())
            .unwrap_err();
        assert!(err.to_string().contains("invalid URL"));
    }
}
