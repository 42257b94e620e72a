use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::Result;
use deployments::{
    ContractSource,
    DEFAULT_CONTRACT_DATA_URL,
    IGNITION_DEPLOYMENTS_ROOT,
    SLOT_MACHINE_ARTIFACT,
};
use slots_client::ethers_gateway::ConfirmPolicy;
use std::{
    path::PathBuf,
    time::Duration,
};
use url::Url;

mod client;
mod ui;
mod wallets;

#[derive(Parser, Debug)]
#[command(
    name = "slots",
    about = "Commit-reveal slot machine client: play spins or run the house",
    version,
    group(ArgGroup::new("signer").args(["wallet", "private_key"]))
)]
struct Cli {
    /// JSON-RPC endpoint of the chain
    #[arg(long, env = "SLOTS_RPC_URL", default_value = client::DEFAULT_RPC_URL)]
    rpc_url: Url,

    /// Chain the contract is deployed on
    #[arg(long, default_value_t = client::DEFAULT_CHAIN_ID)]
    chain_id: u64,

    /// Published `{address, abi}` document for the deployment
    #[arg(long, env = "SLOTS_CONTRACT_DATA_URL", default_value = DEFAULT_CONTRACT_DATA_URL)]
    contract_data_url: Url,

    /// Read the deployment from a Hardhat Ignition directory instead
    #[arg(long, num_args = 0..=1, default_missing_value = IGNITION_DEPLOYMENTS_ROOT)]
    ignition_deployments: Option<PathBuf>,

    /// Compiled SlotMachine artifact, used with --ignition-deployments
    #[arg(long, default_value = SLOT_MACHINE_ARTIFACT)]
    artifact: PathBuf,

    /// Keystore name to sign with
    #[arg(long)]
    wallet: Option<String>,

    /// Override the keystore directory (defaults to ~/.foundry/keystores)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Raw private key to sign with
    #[arg(long, env = "SLOTS_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// House secret, as text or a 0x-prefixed 32-byte word
    #[arg(long, env = "SLOTS_HOUSE_SECRET", hide_env_values = true)]
    house_secret: Option<String>,

    /// Polling interval for events and chain id, in milliseconds
    #[arg(long, default_value_t = 1_000)]
    poll_interval_ms: u64,

    /// Give up waiting for a transaction after this many seconds
    #[arg(long, default_value_t = 120)]
    confirm_timeout_secs: u64,

    /// Confirmations to wait for before a transaction counts as included
    #[arg(long, default_value_t = 1)]
    confirmations: usize,

    /// Write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep a commitment available and resolve every requested spin
    House,
    /// Place a spin
    Spin {
        /// Bet in ETH, e.g. 0.01
        bet: String,
        /// Seed mixed into the roll; random when omitted
        #[arg(long)]
        seed: Option<String>,
    },
    /// Commit the house secret if no commitment is set
    Commit,
    /// Reveal the house secret for one player's pending spin
    Resolve {
        /// Player address
        player: String,
    },
    /// Reclaim this wallet's stuck wager
    Refund,
    /// Print session, balances and pending spin
    Status {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

impl From<Command> for client::Action {
    fn from(command: Command) -> Self {
        match command {
            Command::House => client::Action::House,
            Command::Spin { bet, seed } => client::Action::Spin { bet, seed },
            Command::Commit => client::Action::Commit,
            Command::Resolve { player } => client::Action::Resolve { player },
            Command::Refund => client::Action::Refund,
            Command::Status { json } => client::Action::Status { json },
        }
    }
}

fn app_config(cli: &Cli) -> Result<client::AppConfig> {
    let source = match &cli.ignition_deployments {
        Some(dir) => ContractSource::Ignition {
            deployments_dir: dir.clone(),
            chain_id: cli.chain_id,
            artifact: cli.artifact.clone(),
        },
        None => ContractSource::Endpoint(cli.contract_data_url.clone()),
    };
    let wallet = match (&cli.wallet, &cli.private_key) {
        (Some(name), _) => client::WalletConfig::Keystore {
            name: name.clone(),
            dir: wallets::resolve_wallet_dir(cli.wallet_dir.as_deref())?,
        },
        (None, Some(key)) => client::WalletConfig::PrivateKey(key.clone()),
        (None, None) => client::WalletConfig::ReadOnly,
    };
    Ok(client::AppConfig {
        rpc_url: cli.rpc_url.clone(),
        chain_id: cli.chain_id,
        source,
        wallet,
        house_secret: cli.house_secret.clone(),
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
        confirm: ConfirmPolicy {
            confirmations: cli.confirmations,
            timeout: Duration::from_secs(cli.confirm_timeout_secs),
        },
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let _log_guard = client::init_tracing(cli.log_dir.as_deref())?;
    tracing::info!("starting slots client");
    let config = app_config(&cli)?;
    client::run_app(config, cli.command.into()).await
}
