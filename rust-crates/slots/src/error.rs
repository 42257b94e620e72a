use ethers::types::Address;
use std::time::Duration;

pub type Result<T, E = SlotsError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotsError {
    #[error("chain connection unavailable: {0}")]
    TransportUnavailable(String),
    #[error("wrong network: expected chain {expected}, connected to chain {actual}")]
    WrongNetwork { expected: u64, actual: u64 },
    #[error("SlotMachine not deployed at {address:#x}")]
    NotDeployed { address: Address },
    #[error("need owner wallet to {action}: signer {signer:#x} is not owner {owner:#x}")]
    PermissionDenied {
        action: &'static str,
        signer: Address,
        owner: Address,
    },
    #[error("house secret is required")]
    EmptySecret,
    #[error("invalid contract data: {0}")]
    InvalidContractData(String),
    #[error("invalid bet: {0}")]
    InvalidWager(String),
    #[error("waiting for house commit")]
    AwaitingCommit,
    #[error("transaction reverted: {reason}")]
    TransactionReverted { reason: String },
    #[error("transaction {tx_hash} not confirmed after {waited:?}")]
    TransactionTimeout { tx_hash: String, waited: Duration },
    #[error("local commitment {local} disagrees with on-chain commitment {chain}")]
    CommitmentMismatch { local: String, chain: String },
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl SlotsError {
    /// Expected refusals are reported as status, not as faults.
    pub fn is_fault(&self) -> bool {
        !matches!(
            self,
            SlotsError::PermissionDenied { .. }
                | SlotsError::WrongNetwork { .. }
                | SlotsError::AwaitingCommit
                | SlotsError::InvalidWager(_)
        )
    }
}
