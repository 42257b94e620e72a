//! The commit / spin / resolve state machine.
//!
//! One [`Orchestrator`] owns one session: a cached view of the contract, the
//! one-shot latches, and a ticket book keyed by player so a spin is never
//! resolved twice concurrently. Chain events and identity changes are
//! consumed by [`Orchestrator::run`]; user intents arrive as method calls.

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
    },
    notify::{
        LogKind,
        Notification,
        Notifier,
        Tone,
    },
    outcome::{
        SpinResult,
        map_roll,
    },
    secret::{
        HouseSecret,
        normalize,
        random_seed,
    },
    session::{
        CommitmentState,
        Session,
        SessionSnapshot,
    },
    tickets::TicketBook,
    types::{
        Bytes32,
        ConfigSnapshot,
        PendingSpin,
        SpinRequest,
        TokenBalance,
        TxReceipt,
        Wager,
        format_eth,
        short_addr,
        short_hash,
    },
};
use ethers::types::{
    Address,
    U256,
};
use futures::{
    Stream,
    StreamExt,
};
use std::{
    future::Future,
    sync::{
        Arc,
        Mutex,
        PoisonError,
    },
};
use tokio::{
    sync::Notify,
    task::{
        JoinError,
        JoinSet,
    },
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

#[cfg(test)]
mod tests;

#[derive(Clone, Debug)]
pub struct Settings {
    pub target_chain_id: u64,
    pub house_secret: Option<HouseSecret>,
    pub auto_resolve: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(Bytes32),
    AlreadySet(Bytes32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(SpinResult),
    /// The transaction confirmed but carried no `SpinResolved` for the
    /// player, e.g. the spin was already settled.
    NoMatchingEvent,
    /// Another resolution for the player holds the ticket. Nothing was sent.
    AlreadyInFlight,
}

type Resolutions = JoinSet<(Address, Result<ResolveOutcome>)>;

pub struct Orchestrator<G, I, N> {
    gateway: G,
    identity: I,
    notifier: N,
    settings: Settings,
    session: Session,
    tickets: TicketBook<Address>,
    commit_lock: tokio::sync::Mutex<()>,
    spin_requests: Mutex<Option<SpinRequestStream>>,
    requests_ready: Notify,
}

impl<G, I, N> Orchestrator<G, I, N>
where
    G: ContractGateway,
    I: ChainIdentity,
    N: Notifier,
{
    pub fn new(gateway: G, identity: I, notifier: N, settings: Settings) -> Self {
        Self {
            gateway,
            identity,
            notifier,
            settings,
            session: Session::new(),
            tickets: TicketBook::new(),
            commit_lock: tokio::sync::Mutex::new(()),
            spin_requests: Mutex::new(None),
            requests_ready: Notify::new(),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn session(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn is_resolving(&self, player: Address) -> bool {
        self.tickets.contains(&player)
    }

    /// Establishes identity and network, then primes the session: balances,
    /// contract config, the house commitment and the spin request listener.
    pub async fn connect(&self) -> Result<Address> {
        let result = self.connect_inner().await;
        if let Err(err) = &result {
            self.report_failure("Connect failed", err);
        }
        result
    }

    async fn connect_inner(&self) -> Result<Address> {
        let accounts = self.identity.request_accounts().await?;
        let user = accounts.first().copied().ok_or_else(|| {
            SlotsError::TransportUnavailable("no authorised accounts".to_string())
        })?;

        let target = self.settings.target_chain_id;
        let chain_id = self.identity.chain_id().await?;
        if chain_id != target {
            self.status(format!("Wrong network (chainId {chain_id})"), Tone::Warn);
            if let Err(err) = self.identity.switch_network(target).await {
                warn!(%err, target, "network switch failed");
                self.log(
                    format!("Please manually switch to chain {target}"),
                    LogKind::Err,
                );
            }
        }

        self.session.set_user(Some(user));
        info!(user = %format!("{user:#x}"), "connected");
        self.notify(
            Notification::status("Connected", Tone::Good)
                .with_log(format!("Connected: {user:#x}"), LogKind::Ok),
        );

        self.refresh_balance().await;
        self.refresh_loyalty().await;
        if let Err(err) = self.refresh_config().await {
            self.report_failure("Failed to read contract", &err);
        }
        self.try_auto_commit().await;
        if let Err(err) = self.setup_auto_resolve().await {
            warn!(%err, "auto-resolve listener not attached");
        }
        Ok(user)
    }

    pub async fn ensure_network(&self) -> Result<()> {
        let expected = self.settings.target_chain_id;
        let actual = self.identity.chain_id().await?;
        if actual != expected {
            return Err(SlotsError::WrongNetwork { expected, actual });
        }
        Ok(())
    }

    /// Re-reads config, commitment and owner together and overwrites the
    /// cached copies.
    pub async fn refresh_config(&self) -> Result<ConfigSnapshot> {
        let (config, commitment, owner) = tokio::try_join!(
            self.gateway.config(),
            self.gateway.current_commit(),
            self.gateway.owner(),
        )?;
        self.log(
            format!(
                "Config: min {} • max {}",
                format_eth(config.min_bet),
                format_eth(config.max_bet)
            ),
            LogKind::Ok,
        );
        self.session.apply_refresh(config, commitment, owner)?;
        Ok(config)
    }

    /// Best effort: a failed read leaves the placeholder.
    pub async fn refresh_balance(&self) -> Option<U256> {
        let balance = match self.session.user() {
            Some(user) => match self.gateway.native_balance(user).await {
                Ok(balance) => Some(balance),
                Err(err) => {
                    debug!(%err, "balance refresh failed");
                    None
                }
            },
            None => None,
        };
        self.session.set_balance(balance);
        balance
    }

    /// Best effort: a failed read leaves the placeholder.
    pub async fn refresh_loyalty(&self) -> Option<TokenBalance> {
        let loyalty = match self.session.user() {
            Some(user) => match self.gateway.loyalty_balance(user).await {
                Ok(loyalty) => Some(loyalty),
                Err(err) => {
                    debug!(%err, "loyalty refresh failed");
                    None
                }
            },
            None => None,
        };
        self.session.set_loyalty(loyalty);
        loyalty
    }

    pub async fn commit(&self) -> Result<CommitOutcome> {
        let result = self.commit_inner().await;
        if let Err(err) = &result {
            self.report_failure("Commit failed", err);
        }
        result
    }

    async fn commit_inner(&self) -> Result<CommitOutcome> {
        let secret = self.house_secret()?;
        let _serial = self.commit_lock.lock().await;

        self.ensure_network().await?;
        if let CommitmentState::Set(existing) = self.session.commitment() {
            return Ok(CommitOutcome::AlreadySet(existing));
        }
        let onchain = self.gateway.current_commit().await?;
        if !onchain.is_zero() {
            self.session.observe_commitment(onchain)?;
            return Ok(CommitOutcome::AlreadySet(onchain));
        }
        self.require_owner("commit").await?;

        let commitment = secret.commitment()?;
        self.session.begin_commit();
        self.notify(
            Notification::status("Committing house seed...", Tone::Neutral)
                .with_log("Committing house seed...", LogKind::Info),
        );
        match self.gateway.commit_random(commitment).await {
            Ok(receipt) => {
                self.session.finish_commit(commitment);
                info!(
                    %commitment,
                    tx_hash = %format!("{:#x}", receipt.tx_hash),
                    "house commit set"
                );
                self.notify(
                    Notification::status("Commit set ✓", Tone::Good)
                        .with_log("House commit successful", LogKind::Ok),
                );
                Ok(CommitOutcome::Committed(commitment))
            }
            Err(err) => {
                self.session.abort_commit();
                Err(err)
            }
        }
    }

    /// Commits once per session when a house secret is configured and the
    /// commitment is unset. Refusals become notices.
    pub async fn try_auto_commit(&self) -> Option<CommitOutcome> {
        if self.settings.house_secret.is_none() || self.session.commitment().is_set() {
            return None;
        }
        if !self.session.arm_commit_latch() {
            debug!("auto-commit already attempted this session");
            return None;
        }
        match self.commit_inner().await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                self.report_failure("Commit failed", &err);
                None
            }
        }
    }

    /// Reveals the house secret for `player`'s pending spin. The player's
    /// ticket is held for the whole attempt and released on every exit path.
    pub async fn resolve_player(&self, player: Address) -> Result<ResolveOutcome> {
        let Some(_ticket) = self.tickets.try_acquire(player) else {
            debug!(player = %format!("{player:#x}"), "resolution already in flight");
            return Ok(ResolveOutcome::AlreadyInFlight);
        };
        let result = self.resolve_with_ticket(player).await;
        if let Err(err) = &result {
            self.report_failure("Resolve failed", err);
        }
        result
    }

    async fn resolve_with_ticket(&self, player: Address) -> Result<ResolveOutcome> {
        let secret = self.house_secret()?.normalized()?;
        self.ensure_network().await?;
        self.require_owner("resolve").await?;
        if !self.session.commitment().is_set() {
            self.commit_inner().await?;
        }

        self.log(
            format!("Resolving spin for {}...", short_addr(player)),
            LogKind::Info,
        );
        let receipt = self.gateway.resolve_spin(player, secret).await?;
        let outcome = match receipt.resolution_for(player) {
            Some(resolution) => {
                let result = map_roll(resolution.roll);
                info!(
                    player = %format!("{player:#x}"),
                    roll = %resolution.roll,
                    payout = %resolution.payout,
                    "spin resolved"
                );
                self.notify(
                    Notification::status(format!("Result: {}", result.category), Tone::Good)
                        .with_log(format!("Spin resolved: {}", result.category), LogKind::Ok)
                        .with_result(result),
                );
                ResolveOutcome::Resolved(result)
            }
            None => {
                info!(player = %format!("{player:#x}"), "resolve emitted no SpinResolved");
                self.notify(
                    Notification::status("Spin resolved ✓", Tone::Good)
                        .with_log("Spin resolved", LogKind::Ok),
                );
                ResolveOutcome::NoMatchingEvent
            }
        };

        if let Err(err) = self.refresh_config().await {
            self.report_failure("Failed to read contract", &err);
        }
        self.refresh_loyalty().await;
        self.renew_commitment().await;
        Ok(outcome)
    }

    // Each resolve consumes the commitment on-chain. Re-arm the latch so a
    // long-lived session keeps a commitment available for the next spin.
    // The same secret is committed again, and the last reveal already
    // published it.
    async fn renew_commitment(&self) {
        if self.session.commitment().is_set() {
            return;
        }
        self.session.reset_commit_latch();
        self.try_auto_commit().await;
    }

    /// Places a spin. Never resolves locally: resolution is driven by the
    /// `SpinRequested` event the transaction emits.
    pub async fn spin(&self, wager: Wager, seed: Option<String>) -> Result<TxReceipt> {
        let result = self.spin_inner(wager, seed).await;
        if let Err(err) = &result {
            self.report_failure("Spin failed", err);
        }
        result
    }

    async fn spin_inner(&self, wager: Wager, seed: Option<String>) -> Result<TxReceipt> {
        if self.session.user().is_none() {
            return Err(SlotsError::TransportUnavailable(
                "connect wallet first".to_string(),
            ));
        }
        self.ensure_network().await?;
        if !self.session.commitment().is_set() {
            let onchain = self.gateway.current_commit().await?;
            self.session.observe_commitment(onchain)?;
            if onchain.is_zero() {
                return Err(SlotsError::AwaitingCommit);
            }
        }

        let seed = normalize(&seed.unwrap_or_else(random_seed))?;
        self.notify(
            Notification::status("Submitting spin...", Tone::Neutral)
                .with_log(format!("Spinning with bet {wager}..."), LogKind::Info),
        );
        let receipt = self.gateway.spin(seed, wager).await?;
        info!(
            tx_hash = %format!("{:#x}", receipt.tx_hash),
            wager = %wager,
            "spin requested"
        );
        self.log(format!("Tx: {}", short_hash(receipt.tx_hash)), LogKind::Ok);
        let confirmed = match receipt.block_number {
            Some(block) => format!("Confirmed. Block {block}"),
            None => "Confirmed.".to_string(),
        };
        self.notify(
            Notification::status("Spin requested", Tone::Neutral)
                .with_log(confirmed, LogKind::Ok),
        );

        self.refresh_balance().await;
        self.refresh_loyalty().await;
        Ok(receipt)
    }

    /// Reclaims the connected player's stuck wager.
    pub async fn refund(&self) -> Result<TxReceipt> {
        let result = self.refund_inner().await;
        if let Err(err) = &result {
            self.report_failure("Refund failed", err);
        }
        result
    }

    async fn refund_inner(&self) -> Result<TxReceipt> {
        if self.session.user().is_none() {
            return Err(SlotsError::TransportUnavailable(
                "connect wallet first".to_string(),
            ));
        }
        self.ensure_network().await?;
        let receipt = self.gateway.refund().await?;
        info!(tx_hash = %format!("{:#x}", receipt.tx_hash), "refund confirmed");
        self.notify(
            Notification::status("Refund confirmed", Tone::Good)
                .with_log(format!("Refund tx: {}", short_hash(receipt.tx_hash)), LogKind::Ok),
        );
        self.refresh_balance().await;
        Ok(receipt)
    }

    pub async fn pending_spin(&self, player: Address) -> Result<Option<PendingSpin>> {
        let pending = self.gateway.pending_spin(player).await?;
        Ok((!pending.wager.is_zero()).then_some(pending))
    }

    /// Subscribes to spin requests once per session. Returns whether this
    /// call attached the listener.
    pub async fn setup_auto_resolve(&self) -> Result<bool> {
        if !self.session.bind_events() {
            return Ok(false);
        }
        match self.gateway.spin_requests().await {
            Ok(stream) => {
                *self
                    .spin_requests
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(stream);
                self.requests_ready.notify_one();
                self.log("Auto-resolve listener attached", LogKind::Ok);
                Ok(true)
            }
            Err(err) => {
                self.session.unbind_events();
                self.log(
                    format!("Could not setup auto-resolve: {err}"),
                    LogKind::Err,
                );
                Err(err)
            }
        }
    }

    fn take_spin_requests(&self) -> Option<SpinRequestStream> {
        self.spin_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Drives event-based resolution until `shutdown` completes, then waits
    /// for in-flight resolutions to finish.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()> + Send) {
        let mut requests: Option<SpinRequestStream> = None;
        let mut changes = Some(self.identity.changes());
        let mut resolutions = Resolutions::new();
        tokio::pin!(shutdown);

        loop {
            if requests.is_none() {
                requests = self.take_spin_requests();
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.requests_ready.notified(), if requests.is_none() => {}
                request = next_or_pending(&mut requests) => match request {
                    Some(Ok(request)) => self.on_spin_request(request, &mut resolutions),
                    Some(Err(err)) => warn!(%err, "spin request stream error"),
                    None => {
                        error!("spin request stream ended");
                        self.log("Auto-resolve listener detached", LogKind::Err);
                        self.session.unbind_events();
                        requests = None;
                    }
                },
                change = next_or_pending(&mut changes) => match change {
                    Some(change) => self.on_identity_change(change, &mut requests).await,
                    None => changes = None,
                },
                Some(joined) = resolutions.join_next(), if !resolutions.is_empty() => {
                    finish_resolution(joined);
                }
            }
        }

        drop(requests);
        if !resolutions.is_empty() {
            info!(in_flight = resolutions.len(), "waiting for in-flight resolutions");
        }
        while let Some(joined) = resolutions.join_next().await {
            finish_resolution(joined);
        }
        info!("orchestrator stopped");
    }

    fn on_spin_request(self: &Arc<Self>, request: SpinRequest, resolutions: &mut Resolutions) {
        let player = request.player;
        debug!(
            player = %format!("{player:#x}"),
            wager = %request.wager,
            placed_block = %request.placed_block,
            "SpinRequested"
        );
        if !self.settings.auto_resolve || self.settings.house_secret.is_none() {
            return;
        }
        if self.tickets.contains(&player) {
            debug!(player = %format!("{player:#x}"), "skipping request, resolution in flight");
            return;
        }
        self.log(format!("SpinRequested: {}", short_addr(player)), LogKind::Info);
        let this = Arc::clone(self);
        resolutions.spawn(async move {
            let outcome = this.resolve_player(player).await;
            (player, outcome)
        });
    }

    async fn on_identity_change(
        &self,
        change: IdentityChange,
        requests: &mut Option<SpinRequestStream>,
    ) {
        match change {
            IdentityChange::AccountsChanged(accounts) => {
                warn!(?accounts, "accounts changed");
                self.notify(
                    Notification::status("Account changed", Tone::Warn)
                        .with_log("Account changed. Reconnect needed.", LogKind::Err),
                );
                self.session.clear_account();
            }
            IdentityChange::ChainChanged(chain_id) => {
                warn!(chain_id, "chain changed");
                self.notify(
                    Notification::status("Chain changed", Tone::Warn)
                        .with_log("Chain changed. Reloading...", LogKind::Err),
                );
                *requests = None;
                drop(self.take_spin_requests());
                self.session.reset();
            }
        }
        // Failures are reported by connect itself.
        let _ = self.connect().await;
    }

    fn house_secret(&self) -> Result<&HouseSecret> {
        self.settings
            .house_secret
            .as_ref()
            .ok_or(SlotsError::EmptySecret)
    }

    async fn require_owner(&self, action: &'static str) -> Result<Address> {
        let signer = self.gateway.signer().ok_or_else(|| {
            SlotsError::TransportUnavailable("wallet not connected".to_string())
        })?;
        let owner = match self.session.owner() {
            Some(owner) => owner,
            None => {
                let owner = self.gateway.owner().await?;
                self.session.set_owner(owner);
                owner
            }
        };
        if owner != signer {
            return Err(SlotsError::PermissionDenied {
                action,
                signer,
                owner,
            });
        }
        Ok(signer)
    }

    fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    fn status(&self, text: impl Into<String>, tone: Tone) {
        self.notify(Notification::status(text, tone));
    }

    fn log(&self, text: impl Into<String>, kind: LogKind) {
        self.notify(Notification::log(text, kind));
    }

    fn report_failure(&self, label: &str, err: &SlotsError) {
        if err.is_fault() {
            error!(%err, "{label}");
            self.notify(
                Notification::status(label, Tone::Bad)
                    .with_log(format!("{label}: {err}"), LogKind::Err),
            );
        } else {
            warn!(%err, "{label}");
            self.notify(Notification::status(capitalize(&err.to_string()), Tone::Warn));
        }
    }
}

fn finish_resolution(joined: std::result::Result<(Address, Result<ResolveOutcome>), JoinError>) {
    match joined {
        Ok((player, Ok(outcome))) => {
            debug!(player = %format!("{player:#x}"), ?outcome, "resolution finished");
        }
        Ok((player, Err(err))) => {
            debug!(player = %format!("{player:#x}"), %err, "resolution failed");
        }
        Err(err) => error!(%err, "resolution task aborted"),
    }
}

async fn next_or_pending<S>(stream: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match stream.as_mut() {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
