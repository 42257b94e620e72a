//! In-memory stand-ins for the chain, the wallet and the presenter.
//!
//! [`FakeChain`] models the slot machine's state transitions closely enough
//! to drive the orchestrator end to end: it checks ownership, commitments
//! and pending spins, emits events and counts every write.

use crate::{
    error::{
        Result,
        SlotsError,
    },
    gateway::{
        ContractGateway,
        SpinRequestStream,
    },
    identity::{
        ChainIdentity,
        IdentityChange,
        IdentityChanges,
    },
    notify::{
        Notification,
        Notifier,
    },
    orchestrator::{
        Orchestrator,
        Settings,
    },
    outcome::{
        Category,
        SpinResult,
        map_roll,
    },
    secret::{
        HouseSecret,
        commitment_of,
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
use ethers::types::{
    Address,
    H256,
    U256,
};
use futures::StreamExt;
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};
use tokio::{
    sync::{
        Semaphore,
        mpsc,
        oneshot,
    },
    task::JoinHandle,
};
use tokio_stream::wrappers::UnboundedReceiverStream;

pub const CHAIN_ID: u64 = 31337;
pub const HOUSE_SECRET: &str = "house secret";

pub fn contract_address() -> Address {
    Address::repeat_byte(0x5e)
}

pub fn owner_address() -> Address {
    Address::repeat_byte(0x0a)
}

pub fn player_address() -> Address {
    Address::repeat_byte(0x0b)
}

pub fn other_player_address() -> Address {
    Address::repeat_byte(0x0c)
}

pub fn eth(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(18)
}

#[derive(Debug)]
pub struct ChainState {
    pub chain_id: u64,
    pub owner: Address,
    pub commit: Bytes32,
    pub config: ConfigSnapshot,
    pub pending: HashMap<Address, PendingSpin>,
    pub balances: HashMap<Address, U256>,
    pub loyalty: HashMap<Address, U256>,
    pub rolls: VecDeque<U256>,
    pub block: u64,
    pub commit_calls: usize,
    pub spin_calls: usize,
    pub refund_calls: usize,
    pub resolve_calls: HashMap<Address, usize>,
    pub subscriptions: usize,
    pub fail_subscriptions: bool,
    pub fail_balance_reads: bool,
    subscribers: Vec<mpsc::UnboundedSender<Result<SpinRequest>>>,
}

impl ChainState {
    fn new(owner: Address) -> Self {
        Self {
            chain_id: CHAIN_ID,
            owner,
            commit: Bytes32::ZERO,
            config: ConfigSnapshot {
                min_bet: eth(1) / 1000,
                max_bet: eth(1),
                max_high_bet: eth(5),
                high_bet_threshold: U256::from(100u64),
            },
            pending: HashMap::new(),
            balances: HashMap::new(),
            loyalty: HashMap::new(),
            rolls: VecDeque::new(),
            block: 1,
            commit_calls: 0,
            spin_calls: 0,
            refund_calls: 0,
            resolve_calls: HashMap::new(),
            subscriptions: 0,
            fail_subscriptions: false,
            fail_balance_reads: false,
            subscribers: Vec::new(),
        }
    }

    fn next_receipt(&mut self, events: Vec<SlotEvent>) -> TxReceipt {
        self.block += 1;
        TxReceipt {
            tx_hash: H256::from_low_u64_be(self.block),
            block_number: Some(self.block),
            events,
        }
    }

    fn publish(&mut self, request: SpinRequest) {
        self.subscribers
            .retain(|subscriber| subscriber.send(Ok(request)).is_ok());
    }

    pub fn live_subscribers(&self) -> usize {
        self.subscribers.iter().filter(|s| !s.is_closed()).count()
    }
}

/// Shared chain state. Every [`FakeSlotMachine`] built from one chain sees
/// the same contract.
#[derive(Clone)]
pub struct FakeChain {
    state: Arc<Mutex<ChainState>>,
    gates: Arc<Mutex<HashMap<Address, Arc<Semaphore>>>>,
}

impl FakeChain {
    pub fn new(owner: Address) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState::new(owner))),
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    pub fn slot_machine(&self, signer: Option<Address>) -> FakeSlotMachine {
        FakeSlotMachine {
            chain: self.clone(),
            signer,
        }
    }

    pub fn identity(&self, account: Address) -> FakeIdentity {
        FakeIdentity::new(self.clone(), vec![account])
    }

    /// Queues the roll the next resolved spin reveals.
    pub fn script_roll(&self, roll: u64) {
        self.state().rolls.push_back(U256::from(roll));
    }

    pub fn set_commit(&self, commit: Bytes32) {
        self.state().commit = commit;
    }

    pub fn commit(&self) -> Bytes32 {
        self.state().commit
    }

    pub fn place_pending(&self, player: Address, wager: U256) {
        let mut state = self.state();
        let placed_block = U256::from(state.block);
        state.pending.insert(
            player,
            PendingSpin {
                wager,
                placed_block,
                user_seed: Bytes32([1; 32]),
            },
        );
    }

    pub fn commit_calls(&self) -> usize {
        self.state().commit_calls
    }

    pub fn spin_calls(&self) -> usize {
        self.state().spin_calls
    }

    pub fn resolve_calls(&self, player: Address) -> usize {
        self.state().resolve_calls.get(&player).copied().unwrap_or(0)
    }

    pub fn total_resolve_calls(&self) -> usize {
        self.state().resolve_calls.values().sum()
    }

    /// Parks resolve transactions for `player` until released.
    pub fn hold_resolutions(&self, player: Address) {
        self.gates
            .lock()
            .unwrap()
            .insert(player, Arc::new(Semaphore::new(0)));
    }

    pub fn release_resolutions(&self, player: Address) {
        if let Some(gate) = self.gates.lock().unwrap().remove(&player) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    fn gate(&self, player: Address) -> Option<Arc<Semaphore>> {
        self.gates.lock().unwrap().get(&player).cloned()
    }
}

#[derive(Clone)]
pub struct FakeSlotMachine {
    chain: FakeChain,
    signer: Option<Address>,
}

impl FakeSlotMachine {
    pub fn chain(&self) -> &FakeChain {
        &self.chain
    }

    fn require_signer(&self) -> Result<Address> {
        self.signer.ok_or_else(|| {
            SlotsError::TransportUnavailable("wallet not connected".to_string())
        })
    }
}

fn revert(reason: &str) -> SlotsError {
    SlotsError::TransactionReverted {
        reason: reason.to_string(),
    }
}

fn payout_for(result: &SpinResult, wager: U256) -> U256 {
    match result.category {
        Category::Jackpot => wager * 10,
        Category::Win => wager * 2,
        Category::Loss => U256::zero(),
    }
}

impl ContractGateway for FakeSlotMachine {
    fn address(&self) -> Address {
        contract_address()
    }

    fn signer(&self) -> Option<Address> {
        self.signer
    }

    async fn current_commit(&self) -> Result<Bytes32> {
        Ok(self.chain.state().commit)
    }

    async fn owner(&self) -> Result<Address> {
        Ok(self.chain.state().owner)
    }

    async fn config(&self) -> Result<ConfigSnapshot> {
        Ok(self.chain.state().config)
    }

    async fn pending_spin(&self, player: Address) -> Result<PendingSpin> {
        Ok(self
            .chain
            .state()
            .pending
            .get(&player)
            .copied()
            .unwrap_or(PendingSpin {
                wager: U256::zero(),
                placed_block: U256::zero(),
                user_seed: Bytes32::ZERO,
            }))
    }

    async fn native_balance(&self, account: Address) -> Result<U256> {
        let state = self.chain.state();
        if state.fail_balance_reads {
            return Err(SlotsError::Rpc("balance unavailable".to_string()));
        }
        Ok(state.balances.get(&account).copied().unwrap_or_default())
    }

    async fn loyalty_balance(&self, account: Address) -> Result<TokenBalance> {
        let state = self.chain.state();
        if state.fail_balance_reads {
            return Err(SlotsError::Rpc("loyalty unavailable".to_string()));
        }
        Ok(TokenBalance {
            raw: state.loyalty.get(&account).copied().unwrap_or_default(),
            decimals: 18,
        })
    }

    async fn commit_random(&self, commitment: Bytes32) -> Result<TxReceipt> {
        let signer = self.require_signer()?;
        let mut state = self.chain.state();
        state.commit_calls += 1;
        if signer != state.owner {
            return Err(revert("not owner"));
        }
        if !state.commit.is_zero() {
            return Err(revert("commit already set"));
        }
        state.commit = commitment;
        Ok(state.next_receipt(Vec::new()))
    }

    async fn spin(&self, seed: Bytes32, wager: Wager) -> Result<TxReceipt> {
        let player = self.require_signer()?;
        let mut state = self.chain.state();
        state.spin_calls += 1;
        if state.commit.is_zero() {
            return Err(revert("no house commit"));
        }
        if state.pending.contains_key(&player) {
            return Err(revert("spin already pending"));
        }
        let placed_block = U256::from(state.block + 1);
        let request = SpinRequest {
            player,
            wager: wager.wei(),
            user_seed: seed,
            placed_block,
        };
        state.pending.insert(
            player,
            PendingSpin {
                wager: wager.wei(),
                placed_block,
                user_seed: seed,
            },
        );
        let receipt = state.next_receipt(vec![SlotEvent::SpinRequested(request)]);
        state.publish(request);
        Ok(receipt)
    }

    async fn resolve_spin(&self, player: Address, secret: Bytes32) -> Result<TxReceipt> {
        let signer = self.require_signer()?;
        *self
            .chain
            .state()
            .resolve_calls
            .entry(player)
            .or_default() += 1;

        if let Some(gate) = self.chain.gate(player) {
            gate.acquire()
                .await
                .map_err(|_| SlotsError::Rpc("gate closed".to_string()))?
                .forget();
        }

        let mut state = self.chain.state();
        if signer != state.owner {
            return Err(revert("not owner"));
        }
        let Some(pending) = state.pending.get(&player).copied() else {
            return Ok(state.next_receipt(Vec::new()));
        };
        if state.commit.is_zero() {
            return Err(revert("no house commit"));
        }
        if commitment_of(&secret) != state.commit {
            return Err(revert("bad house secret"));
        }
        let roll = state.rolls.pop_front().unwrap_or_else(|| U256::from(999u64));
        let payout = payout_for(&map_roll(roll), pending.wager);
        state.pending.remove(&player);
        state.commit = Bytes32::ZERO;
        *state.balances.entry(player).or_default() += payout;
        let resolution = SpinResolution {
            player,
            wager: pending.wager,
            roll,
            payout,
            house_secret: secret,
        };
        Ok(state.next_receipt(vec![SlotEvent::SpinResolved(resolution)]))
    }

    async fn refund(&self) -> Result<TxReceipt> {
        let player = self.require_signer()?;
        let mut state = self.chain.state();
        state.refund_calls += 1;
        let Some(pending) = state.pending.remove(&player) else {
            return Err(revert("nothing to refund"));
        };
        *state.balances.entry(player).or_default() += pending.wager;
        Ok(state.next_receipt(Vec::new()))
    }

    async fn spin_requests(&self) -> Result<SpinRequestStream> {
        let mut state = self.chain.state();
        if state.fail_subscriptions {
            return Err(SlotsError::Rpc("filter install refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);
        state.subscriptions += 1;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

pub struct FakeIdentity {
    chain: FakeChain,
    accounts: Vec<Address>,
    allow_switch: bool,
    changes: Mutex<Option<mpsc::UnboundedReceiver<IdentityChange>>>,
    changes_tx: mpsc::UnboundedSender<IdentityChange>,
}

impl FakeIdentity {
    pub fn new(chain: FakeChain, accounts: Vec<Address>) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        Self {
            chain,
            accounts,
            allow_switch: true,
            changes: Mutex::new(Some(changes_rx)),
            changes_tx,
        }
    }

    pub fn refusing_switch(mut self) -> Self {
        self.allow_switch = false;
        self
    }

    /// Handle for pushing account or chain changes at a running orchestrator.
    pub fn change_sender(&self) -> mpsc::UnboundedSender<IdentityChange> {
        self.changes_tx.clone()
    }
}

impl ChainIdentity for FakeIdentity {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        Ok(self.accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain.state().chain_id)
    }

    async fn switch_network(&self, chain_id: u64) -> Result<()> {
        let mut state = self.chain.state();
        if !self.allow_switch {
            return Err(SlotsError::WrongNetwork {
                expected: chain_id,
                actual: state.chain_id,
            });
        }
        state.chain_id = chain_id;
        Ok(())
    }

    fn changes(&self) -> IdentityChanges {
        match self.changes.lock().unwrap().take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => futures::stream::pending().boxed(),
        }
    }
}

/// Keeps every notification for later inspection.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter_map(|n| n.status.map(|s| s.text))
            .collect()
    }

    pub fn results(&self) -> Vec<SpinResult> {
        self.notifications()
            .into_iter()
            .filter_map(|n| n.result)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub type FakeOrchestrator = Orchestrator<FakeSlotMachine, FakeIdentity, RecordingNotifier>;

/// A house and a player wired to one [`FakeChain`], both connected.
pub struct TestContext {
    pub chain: FakeChain,
    house: Arc<FakeOrchestrator>,
    house_notes: RecordingNotifier,
    player: Arc<FakeOrchestrator>,
    player_notes: RecordingNotifier,
}

impl TestContext {
    pub async fn new() -> Self {
        let chain = FakeChain::new(owner_address());
        let (house, house_notes) = Self::orchestrator(
            &chain,
            owner_address(),
            Some(HOUSE_SECRET),
        );
        let (player, player_notes) = Self::orchestrator(&chain, player_address(), None);
        house.connect().await.unwrap();
        player.connect().await.unwrap();
        Self {
            chain,
            house,
            house_notes,
            player,
            player_notes,
        }
    }

    /// An orchestrator signing as `account`. Auto-resolve is on exactly
    /// when a house secret is given.
    pub fn orchestrator(
        chain: &FakeChain,
        account: Address,
        house_secret: Option<&str>,
    ) -> (Arc<FakeOrchestrator>, RecordingNotifier) {
        let notifier = RecordingNotifier::new();
        let settings = Settings {
            target_chain_id: CHAIN_ID,
            house_secret: house_secret.map(|s| HouseSecret::new(s).unwrap()),
            auto_resolve: house_secret.is_some(),
        };
        let orchestrator = Orchestrator::new(
            chain.slot_machine(Some(account)),
            chain.identity(account),
            notifier.clone(),
            settings,
        );
        (Arc::new(orchestrator), notifier)
    }

    pub fn house(&self) -> &Arc<FakeOrchestrator> {
        &self.house
    }

    pub fn house_notes(&self) -> &RecordingNotifier {
        &self.house_notes
    }

    pub fn player(&self) -> &Arc<FakeOrchestrator> {
        &self.player
    }

    pub fn player_notes(&self) -> &RecordingNotifier {
        &self.player_notes
    }

    pub fn run_house(&self) -> RunningHouse {
        RunningHouse::spawn(&self.house)
    }
}

/// A spawned [`Orchestrator::run`] loop.
pub struct RunningHouse {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RunningHouse {
    pub fn spawn(orchestrator: &Arc<FakeOrchestrator>) -> Self {
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(Arc::clone(orchestrator).run(async move {
            let _ = stopped.await;
        }));
        Self {
            stop: Some(stop),
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Requests shutdown without waiting for it.
    pub fn signal_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    pub async fn join(self) {
        self.handle.await.unwrap();
    }

    pub async fn stop(mut self) {
        self.signal_stop();
        self.join().await;
    }
}
