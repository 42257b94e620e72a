use crate::{
    ui,
    wallets,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::ContractSource;
use ethers::{
    providers::{
        Http,
        Provider,
    },
    signers::{
        LocalWallet,
        Signer,
    },
    types::Address,
};
use serde::Serialize;
use slots_client::{
    CommitOutcome,
    ContractGateway,
    HouseSecret,
    Orchestrator,
    ResolveOutcome,
    Settings,
    Wager,
    discover,
    ethers_gateway::{
        Access,
        ConfirmPolicy,
        EthersGateway,
    },
    identity::RpcIdentity,
    notify::Notification,
    session::SessionSnapshot,
    types::{
        PendingSpin,
        format_eth,
        short_hash,
    },
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::info;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::EnvFilter;
use url::Url;

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_CHAIN_ID: u64 = 31337;
const LOG_FILE_PREFIX: &str = "slots.log";

type AppOrchestrator = Orchestrator<EthersGateway, RpcIdentity, mpsc::UnboundedSender<Notification>>;

#[derive(Clone, Debug)]
pub enum WalletConfig {
    ReadOnly,
    Keystore { name: String, dir: PathBuf },
    PrivateKey(String),
}

#[derive(Clone, Debug)]
pub enum Action {
    House,
    Spin { bet: String, seed: Option<String> },
    Commit,
    Resolve { player: String },
    Refund,
    Status { json: bool },
}

impl Action {
    fn needs_house_secret(&self) -> bool {
        matches!(self, Action::House | Action::Commit | Action::Resolve { .. })
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub rpc_url: Url,
    pub chain_id: u64,
    pub source: ContractSource,
    pub wallet: WalletConfig,
    pub house_secret: Option<String>,
    pub poll_interval: Duration,
    pub confirm: ConfirmPolicy,
}

#[derive(Serialize)]
struct StatusReport {
    contract: Address,
    session: SessionSnapshot,
    pending: Option<PendingSpin>,
}

/// Installs the subscriber. With a log directory, output goes to a daily
/// rolling file and the returned guard must outlive the program.
pub fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|err| eyre!("Failed to install tracing subscriber: {err}"))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|err| eyre!("Failed to install tracing subscriber: {err}"))?;
            Ok(None)
        }
    }
}

fn load_wallet(config: &WalletConfig, chain_id: u64) -> Result<Option<LocalWallet>> {
    match config {
        WalletConfig::ReadOnly => Ok(None),
        WalletConfig::Keystore { name, dir } => {
            let descriptor = wallets::find_wallet(dir, name)?;
            wallets::unlock_wallet(&descriptor, chain_id).map(Some)
        }
        WalletConfig::PrivateKey(raw) => wallets::parse_private_key(raw, chain_id).map(Some),
    }
}

async fn bootstrap(
    config: &AppConfig,
    action: &Action,
    notifier: mpsc::UnboundedSender<Notification>,
) -> Result<AppOrchestrator> {
    let (address, _) = discover(&config.source)
        .await
        .wrap_err_with(|| format!("Failed to load contract data from {}", config.source))?;

    let provider = Provider::new(Http::new(config.rpc_url.clone())).interval(config.poll_interval);
    let wallet = load_wallet(&config.wallet, config.chain_id)?;
    let signer = wallet.as_ref().map(|wallet| wallet.address());
    let access = match wallet {
        Some(wallet) => Access::Signer(wallet),
        None => Access::ReadOnly,
    };
    let gateway = EthersGateway::connect(provider.clone(), address, access, config.confirm)
        .await
        .wrap_err("Failed to bind SlotMachine")?;
    let identity = RpcIdentity::new(provider, signer, config.poll_interval);

    let house_secret = if action.needs_house_secret() {
        config
            .house_secret
            .clone()
            .map(HouseSecret::new)
            .transpose()?
    } else {
        None
    };
    let settings = Settings {
        target_chain_id: config.chain_id,
        house_secret,
        auto_resolve: matches!(action, Action::House),
    };
    Ok(Orchestrator::new(gateway, identity, notifier, settings))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

pub async fn run_app(config: AppConfig, action: Action) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let presenter = tokio::spawn(ui::present(rx));

    let result = match bootstrap(&config, &action, tx).await {
        Ok(orchestrator) => dispatch(Arc::new(orchestrator), action).await,
        Err(err) => Err(err),
    };

    // Every sender is gone once the orchestrator is dropped.
    let _ = presenter.await;
    result
}

async fn dispatch(orchestrator: Arc<AppOrchestrator>, action: Action) -> Result<()> {
    let user = orchestrator.connect().await?;
    match action {
        Action::House => {
            if orchestrator.settings().house_secret.is_none() {
                return Err(eyre!(
                    "House mode needs --house-secret (or SLOTS_HOUSE_SECRET)"
                ));
            }
            info!("house running; press ctrl-c to stop");
            Arc::clone(&orchestrator).run(shutdown_signal()).await;
        }
        Action::Spin { bet, seed } => {
            let wager = Wager::from_ether(&bet)?;
            let receipt = orchestrator.spin(wager, seed).await?;
            println!(
                "Spin {} placed for {wager}; the house resolves it on its next block.",
                short_hash(receipt.tx_hash)
            );
        }
        Action::Commit => match orchestrator.commit().await? {
            CommitOutcome::Committed(commitment) => println!("Committed {commitment}"),
            CommitOutcome::AlreadySet(commitment) => {
                println!("Commitment already set: {commitment}")
            }
        },
        Action::Resolve { player } => {
            let player: Address = player
                .parse()
                .map_err(|err| eyre!("Invalid player address {player:?}: {err}"))?;
            match orchestrator.resolve_player(player).await? {
                ResolveOutcome::Resolved(result) => println!("{result}"),
                ResolveOutcome::NoMatchingEvent => {
                    println!("Resolved, but no SpinResolved event for {player:#x}")
                }
                ResolveOutcome::AlreadyInFlight => {
                    println!("A resolution for {player:#x} is already in flight")
                }
            }
        }
        Action::Refund => {
            let receipt = orchestrator.refund().await?;
            println!("Refunded in {}", short_hash(receipt.tx_hash));
        }
        Action::Status { json } => {
            let report = StatusReport {
                contract: orchestrator.gateway().address(),
                session: orchestrator.session(),
                pending: orchestrator.pending_spin(user).await?,
            };
            print_status(&report, json)?;
        }
    }
    Ok(())
}

fn print_status(report: &StatusReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let session = &report.session;
    println!("Contract:   {:#x}", report.contract);
    if let Some(user) = session.user {
        println!("Account:    {user:#x}");
    }
    if let Some(owner) = session.owner {
        println!("Owner:      {owner:#x}");
    }
    println!(
        "Balance:    {}",
        session.balance.map(format_eth).unwrap_or_else(|| "-".to_string())
    );
    println!(
        "Loyalty:    {}",
        session
            .loyalty
            .map(|loyalty| loyalty.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    if let Some(config) = session.config {
        println!(
            "Bets:       min {} • max {} (high {} above roll {})",
            format_eth(config.min_bet),
            format_eth(config.max_bet),
            format_eth(config.max_high_bet),
            config.high_bet_threshold
        );
    }
    println!("Commitment: {:?}", session.commitment);
    match report.pending {
        Some(pending) => println!(
            "Pending:    {} placed at block {}",
            format_eth(pending.wager),
            pending.placed_block
        ),
        None => println!("Pending:    none"),
    }
    Ok(())
}
