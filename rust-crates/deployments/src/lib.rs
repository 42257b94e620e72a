use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
};
use reqwest::header::CACHE_CONTROL;
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    collections::HashMap,
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
};
use url::Url;

pub const DEFAULT_CONTRACT_DATA_URL: &str =
    "http://localhost:5173/contract-data/slot-machine.json";
pub const IGNITION_DEPLOYMENTS_ROOT: &str = "ignition/deployments";
pub const SLOT_MACHINE_ARTIFACT: &str =
    "artifacts/contracts/SlotMachine.sol/SlotMachine.json";
pub const SLOT_MACHINE_KEY: &str = "SlotsModule#SlotMachine";
const DEPLOYED_ADDRESSES_FILE: &str = "deployed_addresses.json";

/// Address and ABI of one deployed slot machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractData {
    pub address: String,
    pub abi: serde_json::Value,
}

impl ContractData {
    /// Parses and validates a `{address, abi}` payload.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: RawContractData =
            serde_json::from_slice(bytes).context("Contract data is not valid JSON")?;
        let address = raw
            .address
            .filter(|address| !address.trim().is_empty())
            .ok_or_else(|| anyhow!("Invalid contract data payload: missing address"))?;
        let abi = raw
            .abi
            .ok_or_else(|| anyhow!("Invalid contract data payload: missing abi"))?;
        let data = Self { address, abi };
        data.validate()?;
        Ok(data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            bail!("Invalid contract data payload: empty address");
        }
        if !self.abi.is_array() {
            bail!("Invalid contract data payload: abi must be a JSON array");
        }
        Ok(())
    }

    /// Names of functions and events declared by the ABI.
    pub fn declared_entries(&self) -> Vec<&str> {
        self.abi
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| {
                        matches!(
                            entry.get("type").and_then(|t| t.as_str()),
                            Some("function") | Some("event")
                        )
                    })
                    .filter_map(|entry| entry.get("name").and_then(|n| n.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn missing_entries(&self, required: &[&str]) -> Vec<String> {
        let declared = self.declared_entries();
        required
            .iter()
            .copied()
            .filter(|name| !declared.contains(name))
            .map(|name| name.to_string())
            .collect()
    }

    /// Fails unless every required function and event is declared.
    pub fn ensure_entries(&self, required: &[&str]) -> Result<()> {
        let missing = self.missing_entries(required);
        if !missing.is_empty() {
            bail!(
                "Contract ABI at {} is missing required entries: {}",
                self.address,
                missing.join(", ")
            );
        }
        Ok(())
    }

    pub fn abi_fingerprint(&self) -> Result<String> {
        let bytes =
            serde_json::to_vec(&self.abi).context("Failed to serialize contract ABI")?;
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[derive(Deserialize)]
struct RawContractData {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    abi: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CompiledArtifact {
    abi: serde_json::Value,
}

/// Where the client learns which deployment to talk to.
#[derive(Clone, Debug)]
pub enum ContractSource {
    /// A published `{address, abi}` document.
    Endpoint(Url),
    /// A local Hardhat Ignition deployment plus the compiled artifact.
    Ignition {
        deployments_dir: PathBuf,
        chain_id: u64,
        artifact: PathBuf,
    },
}

impl fmt::Display for ContractSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractSource::Endpoint(url) => write!(f, "{url}"),
            ContractSource::Ignition {
                deployments_dir,
                chain_id,
                ..
            } => write!(
                f,
                "{}",
                ignition_addresses_path(deployments_dir, *chain_id).display()
            ),
        }
    }
}

impl ContractSource {
    pub async fn load(&self) -> Result<ContractData> {
        let data = match self {
            ContractSource::Endpoint(url) => fetch_contract_data(url).await?,
            ContractSource::Ignition {
                deployments_dir,
                chain_id,
                artifact,
            } => load_ignition(deployments_dir, *chain_id, artifact)?,
        };
        tracing::debug!(source = %self, address = %data.address, "loaded contract data");
        Ok(data)
    }
}

pub async fn fetch_contract_data(url: &Url) -> Result<ContractData> {
    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client for contract data")?;
    let res = http
        .get(url.clone())
        .header(CACHE_CONTROL, "no-store")
        .send()
        .await
        .with_context(|| format!("Failed to load contract data from {url}"))?;
    let status = res.status();
    let bytes = res
        .bytes()
        .await
        .context("Failed to read contract data response body")?;
    if !status.is_success() {
        bail!("Failed to load contract data from {url}: server responded with {status}");
    }
    ContractData::from_slice(&bytes)
}

pub fn ignition_addresses_path(deployments_dir: impl AsRef<Path>, chain_id: u64) -> PathBuf {
    deployments_dir
        .as_ref()
        .join(format!("chain-{chain_id}"))
        .join(DEPLOYED_ADDRESSES_FILE)
}

pub fn load_ignition(
    deployments_dir: impl AsRef<Path>,
    chain_id: u64,
    artifact: impl AsRef<Path>,
) -> Result<ContractData> {
    let addresses_path = ignition_addresses_path(deployments_dir, chain_id);
    let raw = fs::read(&addresses_path).with_context(|| {
        format!("Failed to read deployed addresses: {}", addresses_path.display())
    })?;
    let addresses: HashMap<String, String> = serde_json::from_slice(&raw)
        .with_context(|| format!("Invalid deployed addresses file: {}", addresses_path.display()))?;
    let address = addresses
        .get(SLOT_MACHINE_KEY)
        .cloned()
        .ok_or_else(|| anyhow!("SlotMachine address not found in deployments"))?;

    let artifact = artifact.as_ref();
    let raw = fs::read(artifact).with_context(|| {
        format!("Failed to read contract artifact: {}", artifact.display())
    })?;
    let compiled: CompiledArtifact = serde_json::from_slice(&raw)
        .with_context(|| format!("Invalid contract artifact: {}", artifact.display()))?;

    let data = ContractData {
        address,
        abi: compiled.abi,
    };
    data.validate()?;
    Ok(data)
}
