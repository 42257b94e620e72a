use crate::error::{
    Result,
    SlotsError,
};
use ethers::{
    providers::{
        Http,
        Middleware,
        Provider,
    },
    types::Address,
};
use futures::{
    StreamExt,
    stream::BoxStream,
};
use serde_json::json;
use std::{
    future::Future,
    time::Duration,
};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityChange {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

pub type IdentityChanges = BoxStream<'static, IdentityChange>;

/// The account and network the client acts through.
pub trait ChainIdentity: Send + Sync + 'static {
    fn request_accounts(&self) -> impl Future<Output = Result<Vec<Address>>> + Send;

    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    fn switch_network(&self, chain_id: u64) -> impl Future<Output = Result<()>> + Send;

    fn changes(&self) -> IdentityChanges;
}

/// Identity backed by a JSON-RPC endpoint and an optional local signer.
#[derive(Clone)]
pub struct RpcIdentity {
    provider: Provider<Http>,
    signer: Option<Address>,
    poll_interval: Duration,
}

impl RpcIdentity {
    pub fn new(provider: Provider<Http>, signer: Option<Address>, poll_interval: Duration) -> Self {
        Self {
            provider,
            signer,
            poll_interval,
        }
    }
}

impl ChainIdentity for RpcIdentity {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        if let Some(signer) = self.signer {
            return Ok(vec![signer]);
        }
        self.provider
            .get_accounts()
            .await
            .map_err(|err| SlotsError::TransportUnavailable(err.to_string()))
    }

    async fn chain_id(&self) -> Result<u64> {
        let id = self
            .provider
            .get_chainid()
            .await
            .map_err(|err| SlotsError::TransportUnavailable(err.to_string()))?;
        Ok(id.low_u64())
    }

    async fn switch_network(&self, chain_id: u64) -> Result<()> {
        let params = [json!({ "chainId": format!("{chain_id:#x}") })];
        let switched: std::result::Result<serde_json::Value, _> = self
            .provider
            .request("wallet_switchEthereumChain", params)
            .await;
        if let Err(err) = switched {
            debug!(%err, chain_id, "endpoint refused network switch");
        }
        let actual = self.chain_id().await?;
        if actual != chain_id {
            return Err(SlotsError::WrongNetwork {
                expected: chain_id,
                actual,
            });
        }
        Ok(())
    }

    fn changes(&self) -> IdentityChanges {
        let provider = self.provider.clone();
        let poll_interval = self.poll_interval;
        futures::stream::unfold(
            (provider, None::<u64>),
            move |(provider, mut last)| async move {
                loop {
                    tokio::time::sleep(poll_interval).await;
                    let Ok(id) = provider.get_chainid().await else {
                        continue;
                    };
                    let id = id.low_u64();
                    match last {
                        Some(previous) if previous != id => {
                            return Some((
                                IdentityChange::ChainChanged(id),
                                (provider, Some(id)),
                            ));
                        }
                        _ => last = Some(id),
                    }
                }
            },
        )
        .boxed()
    }
}
