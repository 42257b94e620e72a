use crate::{
    error::{
        Result,
        SlotsError,
    },
    gateway::{
        ContractGateway,
        SpinRequestStream,
    },
    types::{
        Bytes32,
        ConfigSnapshot,
        PendingSpin,
        SlotEvent,
        SpinRequest,
        SpinResolution,
        TokenBalance,
        TxReceipt,
        Wager,
    },
};
use ethers::{
    abi::Detokenize,
    contract::{
        ContractCall,
        ContractError,
        parse_log,
    },
    middleware::{
        NonceManagerMiddleware,
        SignerMiddleware,
    },
    providers::{
        Http,
        JsonRpcClient,
        Middleware,
        Provider,
    },
    signers::{
        LocalWallet,
        Signer,
    },
    types::{
        Address,
        H256,
        TransactionReceipt,
        U64,
        U256,
    },
};
use futures::{
    Stream,
    StreamExt,
};
use slots_abi::{
    loyalty_types::LoyaltyToken,
    slot_machine_types::{
        SlotMachine,
        SlotMachineEvents,
        SpinRequestedFilter,
        SpinResolvedFilter,
    },
};
use std::{
    fmt::Display,
    future::Future,
    sync::Arc,
    time::Duration,
};
use tokio::sync::{
    mpsc,
    oneshot,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{
    debug,
    info,
    warn,
};

type Writer<P> = NonceManagerMiddleware<SignerMiddleware<Provider<P>, LocalWallet>>;

pub enum Access {
    ReadOnly,
    Signer(LocalWallet),
}

#[derive(Clone, Copy, Debug)]
pub struct ConfirmPolicy {
    pub confirmations: usize,
    pub timeout: Duration,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self {
            confirmations: 1,
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct EthersGateway<P: JsonRpcClient = Http> {
    address: Address,
    provider: Provider<P>,
    reader: SlotMachine<Provider<P>>,
    writer: Option<SlotMachine<Writer<P>>>,
    signer: Option<Address>,
    confirm: ConfirmPolicy,
}

impl<P> EthersGateway<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    /// Binds to `address`, refusing to hand out a handle when no code lives
    /// there.
    pub async fn connect(
        provider: Provider<P>,
        address: Address,
        access: Access,
        confirm: ConfirmPolicy,
    ) -> Result<Self> {
        let code = provider
            .get_code(address, None)
            .await
            .map_err(|err| SlotsError::TransportUnavailable(err.to_string()))?;
        if code.as_ref().is_empty() {
            return Err(SlotsError::NotDeployed { address });
        }

        let reader = SlotMachine::new(address, Arc::new(provider.clone()));
        let (writer, signer) = match access {
            Access::ReadOnly => (None, None),
            Access::Signer(wallet) => {
                let signer = wallet.address();
                let client = SignerMiddleware::new(provider.clone(), wallet);
                let client = NonceManagerMiddleware::new(client, signer);
                (
                    Some(SlotMachine::new(address, Arc::new(client))),
                    Some(signer),
                )
            }
        };
        info!(
            contract = %format!("{address:#x}"),
            signer = ?signer.map(|s| format!("{s:#x}")),
            "slot machine gateway connected"
        );
        Ok(Self {
            address,
            provider,
            reader,
            writer,
            signer,
            confirm,
        })
    }

    fn writer(&self) -> Result<&SlotMachine<Writer<P>>> {
        self.writer.as_ref().ok_or_else(|| {
            SlotsError::TransportUnavailable("wallet not connected".to_string())
        })
    }

    async fn submit<D>(
        &self,
        action: &'static str,
        call: ContractCall<Writer<P>, D>,
    ) -> Result<TxReceipt>
    where
        D: Detokenize + Send + Sync,
    {
        let pending = call.send().await.map_err(write_error)?;
        let tx_hash = *pending;
        debug!(action, tx_hash = %format!("{tx_hash:#x}"), "transaction submitted");

        let waiting = pending.confirmations(self.confirm.confirmations);
        let receipt = await_inclusion(waiting, tx_hash, self.confirm.timeout).await?;
        settle_receipt(self.address, action, tx_hash, &receipt)
    }
}

/// Waits for `waiting` to yield the receipt of `tx_hash`, giving up after
/// `timeout`.
async fn await_inclusion<F, E>(
    waiting: F,
    tx_hash: H256,
    timeout: Duration,
) -> Result<TransactionReceipt>
where
    F: Future<Output = std::result::Result<Option<TransactionReceipt>, E>>,
    E: Display,
{
    tokio::time::timeout(timeout, waiting)
        .await
        .map_err(|_| SlotsError::TransactionTimeout {
            tx_hash: format!("{tx_hash:#x}"),
            waited: timeout,
        })?
        .map_err(|err| SlotsError::Rpc(err.to_string()))?
        .ok_or_else(|| {
            SlotsError::Rpc(format!("transaction {tx_hash:#x} dropped before inclusion"))
        })
}

fn settle_receipt(
    contract: Address,
    action: &'static str,
    tx_hash: H256,
    receipt: &TransactionReceipt,
) -> Result<TxReceipt> {
    if receipt.status == Some(U64::zero()) {
        return Err(SlotsError::TransactionReverted {
            reason: format!("{action} transaction {tx_hash:#x} reverted"),
        });
    }
    let block_number = receipt.block_number.map(|n| n.as_u64());
    debug!(action, tx_hash = %format!("{tx_hash:#x}"), ?block_number, "transaction included");
    Ok(TxReceipt {
        tx_hash,
        block_number,
        events: decode_events(contract, receipt),
    })
}

/// Decodes the slot machine events in `receipt`. Logs emitted by other
/// contracts are skipped.
fn decode_events(contract: Address, receipt: &TransactionReceipt) -> Vec<SlotEvent> {
    receipt
        .logs
        .iter()
        .filter(|log| log.address == contract)
        .filter_map(|log| parse_log::<SlotMachineEvents>(log.clone()).ok())
        .map(SlotEvent::from)
        .collect()
}

/// Forwards decoded `SpinRequested` events until the stream ends or the
/// receiving side is dropped.
async fn forward_spin_requests<S, E>(
    mut stream: S,
    tx: mpsc::UnboundedSender<Result<SpinRequest>>,
) where
    S: Stream<Item = std::result::Result<SpinRequestedFilter, E>> + Unpin,
    E: Display,
{
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            next = stream.next() => match next {
                Some(Ok(request)) => {
                    if tx.send(Ok(SpinRequest::from(request))).is_err() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    warn!(%err, "failed to decode SpinRequested log");
                    if tx.send(Err(SlotsError::Rpc(err.to_string()))).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    debug!("spin request watcher stopped");
}

impl<P> ContractGateway for EthersGateway<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    fn address(&self) -> Address {
        self.address
    }

    fn signer(&self) -> Option<Address> {
        self.signer
    }

    async fn current_commit(&self) -> Result<Bytes32> {
        let call = self.reader.current_commit();
        let commit = call.call().await.map_err(read_error)?;
        Ok(Bytes32(commit))
    }

    async fn owner(&self) -> Result<Address> {
        let call = self.reader.owner();
        call.call().await.map_err(read_error)
    }

    async fn config(&self) -> Result<ConfigSnapshot> {
        let min_bet = self.reader.min_bet();
        let max_bet = self.reader.max_bet();
        let max_high_bet = self.reader.max_high_bet();
        let threshold = self.reader.high_bet_threshold();
        let (min_bet, max_bet, max_high_bet, high_bet_threshold) = tokio::try_join!(
            min_bet.call(),
            max_bet.call(),
            max_high_bet.call(),
            threshold.call(),
        )
        .map_err(read_error)?;
        Ok(ConfigSnapshot {
            min_bet,
            max_bet,
            max_high_bet,
            high_bet_threshold,
        })
    }

    async fn pending_spin(&self, player: Address) -> Result<PendingSpin> {
        let call = self.reader.pending_spins(player);
        let (wager, placed_block, user_seed) = call.call().await.map_err(read_error)?;
        Ok(PendingSpin {
            wager,
            placed_block,
            user_seed: Bytes32(user_seed),
        })
    }

    async fn native_balance(&self, account: Address) -> Result<U256> {
        self.provider
            .get_balance(account, None)
            .await
            .map_err(|err| SlotsError::Rpc(err.to_string()))
    }

    async fn loyalty_balance(&self, account: Address) -> Result<TokenBalance> {
        let token = self.reader.loyalty_token();
        let token = token.call().await.map_err(read_error)?;
        let erc20 = LoyaltyToken::new(token, Arc::new(self.provider.clone()));
        let balance = erc20.balance_of(account);
        let decimals = erc20.decimals();
        let (raw, decimals) =
            tokio::try_join!(balance.call(), decimals.call()).map_err(read_error)?;
        Ok(TokenBalance { raw, decimals })
    }

    async fn commit_random(&self, commitment: Bytes32) -> Result<TxReceipt> {
        let call = self.writer()?.commit_random(commitment.into());
        self.submit("commitRandom", call).await
    }

    async fn spin(&self, seed: Bytes32, wager: Wager) -> Result<TxReceipt> {
        let call = self.writer()?.spin(seed.into()).value(wager.wei());
        self.submit("spin", call).await
    }

    async fn resolve_spin(&self, player: Address, secret: Bytes32) -> Result<TxReceipt> {
        let call = self.writer()?.resolve_spin(player, secret.into());
        self.submit("resolveSpin", call).await
    }

    async fn refund(&self) -> Result<TxReceipt> {
        let call = self.writer()?.refund();
        self.submit("refund", call).await
    }

    async fn spin_requests(&self) -> Result<SpinRequestStream> {
        let contract = self.reader.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(async move {
            let event = contract.event::<SpinRequestedFilter>();
            let mut stream = match event.stream().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(read_error(err)));
                    return;
                }
            };
            forward_spin_requests(&mut stream, tx).await;
        });

        ready_rx.await.map_err(|_| {
            SlotsError::Rpc("spin request watcher exited before start".to_string())
        })??;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

impl From<SpinRequestedFilter> for SpinRequest {
    fn from(event: SpinRequestedFilter) -> Self {
        Self {
            player: event.player,
            wager: event.wager,
            user_seed: Bytes32(event.user_seed),
            placed_block: event.placed_block,
        }
    }
}

impl From<SpinResolvedFilter> for SpinResolution {
    fn from(event: SpinResolvedFilter) -> Self {
        Self {
            player: event.player,
            wager: event.wager,
            roll: event.roll,
            payout: event.payout,
            house_secret: Bytes32(event.house_secret),
        }
    }
}

impl From<SlotMachineEvents> for SlotEvent {
    fn from(event: SlotMachineEvents) -> Self {
        match event {
            SlotMachineEvents::SpinRequestedFilter(e) => SlotEvent::SpinRequested(e.into()),
            SlotMachineEvents::SpinResolvedFilter(e) => SlotEvent::SpinResolved(e.into()),
        }
    }
}

fn read_error<M: Middleware>(err: ContractError<M>) -> SlotsError {
    SlotsError::Rpc(err.to_string())
}

fn write_error<M: Middleware>(err: ContractError<M>) -> SlotsError {
    if let Some(reason) = err.decode_revert::<String>() {
        return SlotsError::TransactionReverted { reason };
    }
    if err.is_revert() {
        return SlotsError::TransactionReverted {
            reason: "execution reverted".to_string(),
        };
    }
    SlotsError::Rpc(err.to_string())
}
