use crate::{
    error::{
        Result,
        SlotsError,
    },
    types::{
        Bytes32,
        ConfigSnapshot,
        PendingSpin,
        SpinRequest,
        TokenBalance,
        TxReceipt,
        Wager,
    },
};
use deployments::{
    ContractData,
    ContractSource,
};
use ethers::types::{
    Address,
    U256,
};
use futures::stream::BoxStream;
use slots_abi::REQUIRED_ENTRIES;
use std::future::Future;

/// Live `SpinRequested` events in chain log order. Dropping the stream stops
/// the watcher behind it.
pub type SpinRequestStream = BoxStream<'static, Result<SpinRequest>>;

/// Typed access to one deployed slot machine.
///
/// Writes resolve once the transaction is included and carry the decoded
/// contract events. A gateway without a signer answers every write with
/// [`SlotsError::TransportUnavailable`].
pub trait ContractGateway: Send + Sync + 'static {
    fn address(&self) -> Address;

    fn signer(&self) -> Option<Address>;

    fn current_commit(&self) -> impl Future<Output = Result<Bytes32>> + Send;

    fn owner(&self) -> impl Future<Output = Result<Address>> + Send;

    fn config(&self) -> impl Future<Output = Result<ConfigSnapshot>> + Send;

    fn pending_spin(
        &self,
        player: Address,
    ) -> impl Future<Output = Result<PendingSpin>> + Send;

    fn native_balance(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<U256>> + Send;

    fn loyalty_balance(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<TokenBalance>> + Send;

    fn commit_random(
        &self,
        commitment: Bytes32,
    ) -> impl Future<Output = Result<TxReceipt>> + Send;

    fn spin(
        &self,
        seed: Bytes32,
        wager: Wager,
    ) -> impl Future<Output = Result<TxReceipt>> + Send;

    fn resolve_spin(
        &self,
        player: Address,
        secret: Bytes32,
    ) -> impl Future<Output = Result<TxReceipt>> + Send;

    fn refund(&self) -> impl Future<Output = Result<TxReceipt>> + Send;

    fn spin_requests(&self) -> impl Future<Output = Result<SpinRequestStream>> + Send;
}

/// Loads deployment data and checks it can drive this client.
pub async fn discover(source: &ContractSource) -> Result<(Address, ContractData)> {
    let data = source.load().await.map_err(invalid_contract_data)?;
    let address = validate_contract_data(&data)?;
    Ok((address, data))
}

pub fn validate_contract_data(data: &ContractData) -> Result<Address> {
    data.ensure_entries(REQUIRED_ENTRIES)
        .map_err(invalid_contract_data)?;
    let address = data.address.parse::<Address>().map_err(|err| {
        SlotsError::InvalidContractData(format!(
            "invalid contract address {:?}: {err}",
            data.address
        ))
    })?;
    if let Ok(fingerprint) = data.abi_fingerprint() {
        tracing::debug!(address = %format!("{address:#x}"), %fingerprint, "contract data accepted");
    }
    Ok(address)
}

fn invalid_contract_data(err: impl std::fmt::Display) -> SlotsError {
    SlotsError::InvalidContractData(format!("{err:#}"))
}
