// Copyright 2023 SuperFundrs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Meta-transaction relaying.
//!
//! Transactions never leave the user's wallet as raw signed transactions:
//! they are bundled, signed off-chain and handed to a relay service that
//! pays for gas (sponsored) or collects its fee from the smart account
//! (sync-fee). The relay acknowledges with a task id; this module tracks
//! exactly one in-flight task per session.

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{self, SuperfundrsConfig};
use crate::context::{SessionContext, SessionEvent};
use crate::contracts::{
    JoinOrganizationCall, SetOrganizationCall, SetProposalsAllowedCall,
};
use crate::error::{Error, Result};

/// One call inside a relayed bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaTransaction {
    /// Call target.
    pub to: Address,
    /// ABI-encoded calldata.
    pub data: Bytes,
    /// Native value forwarded with the call, paid by the smart account.
    pub value: U256,
}

/// Lifecycle of the session's single relay slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayStatus {
    /// No relayed transaction in flight.
    #[default]
    Idle,
    /// A bundle is being signed and handed to the relay.
    Submitting,
    /// The relay acknowledged the bundle with a task id.
    Pending,
    /// The relay was asked about a task it no longer knows.
    Unknown,
}

/// The session-scoped relay slot: at most one task id at a time.
#[derive(Debug, Clone, Default)]
pub struct RelayTask {
    /// Task id returned by the relay, once acknowledged.
    pub task_id: Option<String>,
    /// Where the slot currently is in its lifecycle.
    pub status: RelayStatus,
}

/// Per-submission options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Whether the relay sponsors the gas (true) or collects its fee from
    /// the smart account (false).
    pub sponsored: bool,
}

/// A signed, relay-ready bundle.
#[derive(Debug, Clone)]
pub struct SignedBundle {
    /// Chain the bundle executes on.
    pub chain_id: u64,
    /// The smart account the bundle executes through.
    pub safe: Address,
    /// The calls, executed in order.
    pub transactions: Vec<MetaTransaction>,
    /// Owner signature over [`bundle_digest`].
    pub signature: Bytes,
    /// Gas payment mode, see [`RelayOptions`].
    pub sponsored: bool,
}

/// Produces an owner signature over a bundle. One adapter per wallet kind.
#[async_trait]
pub trait BundleSigner: Send + Sync {
    /// Sign the bundle for the given smart account on the given chain.
    async fn sign_bundle(
        &self,
        chain_id: u64,
        safe: Address,
        transactions: &[MetaTransaction],
        options: &RelayOptions,
    ) -> Result<SignedBundle>;
}

/// Hands a signed bundle to a relay service.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Submit the bundle and return the relay's task id.
    async fn execute(&self, bundle: SignedBundle) -> Result<String>;
}

/// Commitment the owner signs: chain id, smart account and every call's
/// target, value and calldata hash, in order.
pub fn bundle_digest(
    chain_id: u64,
    safe: Address,
    transactions: &[MetaTransaction],
) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32 + 20 + transactions.len() * 84);
    buf.extend_from_slice(&U256::from(chain_id).encode());
    buf.extend_from_slice(safe.as_bytes());
    for tx in transactions {
        buf.extend_from_slice(tx.to.as_bytes());
        buf.extend_from_slice(&tx.value.encode());
        buf.extend_from_slice(&keccak256(&tx.data));
    }
    keccak256(buf)
}

/// Signs bundles with an in-memory secp256k1 key.
pub struct LocalBundleSigner {
    wallet: LocalWallet,
}

impl LocalBundleSigner {
    /// Wrap an in-memory wallet.
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }
}

#[async_trait]
impl BundleSigner for LocalBundleSigner {
    async fn sign_bundle(
        &self,
        chain_id: u64,
        safe: Address,
        transactions: &[MetaTransaction],
        options: &RelayOptions,
    ) -> Result<SignedBundle> {
        let digest = bundle_digest(chain_id, safe, transactions);
        let signature = self.wallet.sign_hash(digest.into())?;
        Ok(SignedBundle {
            chain_id,
            safe,
            transactions: transactions.to_vec(),
            signature: signature.to_vec().into(),
            sponsored: options.sponsored,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    chain_id: u64,
    target: String,
    safe: String,
    transactions: Vec<RelayCall>,
    signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sponsorship_api_key: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayCall {
    to: String,
    data: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    task_id: String,
}

/// HTTP adapter for a Gelato-style relay endpoint.
pub struct GelatoRelay {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl GelatoRelay {
    /// Build an adapter for the given chain's relay endpoint, taking the
    /// sponsorship key from the relay section of the config.
    pub fn new(endpoint: Url, config: &SuperfundrsConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key: config.relay.api_key.clone(),
        }
    }
}

#[async_trait]
impl Relay for GelatoRelay {
    async fn execute(&self, bundle: SignedBundle) -> Result<String> {
        let route = if bundle.sponsored {
            "relays/v2/sponsored-call"
        } else {
            "relays/v2/call-with-sync-fee"
        };
        let url = self.endpoint.join(route)?;
        let target = bundle
            .transactions
            .first()
            .map(|tx| format!("{:?}", tx.to))
            .ok_or(Error::Generic("relay bundle is empty"))?;
        let request = RelayRequest {
            chain_id: bundle.chain_id,
            target,
            safe: format!("{:?}", bundle.safe),
            transactions: bundle
                .transactions
                .iter()
                .map(|tx| RelayCall {
                    to: format!("{:?}", tx.to),
                    data: format!("0x{}", hex::encode(&tx.data)),
                    value: tx.value.to_string(),
                })
                .collect(),
            signature: format!("0x{}", hex::encode(&bundle.signature)),
            sponsorship_api_key: self.api_key.as_deref(),
        };
        let response = self.http.post(url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Relay(format!(
                "relay rejected the bundle ({}): {}",
                status, body
            )));
        }
        let acked: RelayResponse = response.json().await?;
        Ok(acked.task_id)
    }
}

/// Sign and submit a single-call bundle through the relay.
///
/// Returns the relay task id, or `None` when the session cannot submit
/// (not authenticated, no smart account) or the submission failed; failure
/// details go to the log and the relay slot returns to `Idle`. A completion
/// that arrives after a chain switch or logout is discarded.
pub async fn submit(
    ctx: &SessionContext,
    signer: &dyn BundleSigner,
    relay: &dyn Relay,
    to: Address,
    data: Bytes,
    value: U256,
    sponsored: bool,
) -> Option<String> {
    if !ctx.session().is_authenticated() {
        tracing::debug!("Ignoring relay submission without an authenticated session");
        return None;
    }
    let Some(safe) = ctx.selected_safe() else {
        tracing::debug!("Ignoring relay submission without a selected smart account");
        return None;
    };
    let epoch = ctx.epoch();
    if !ctx.begin_relay(epoch) {
        tracing::debug!("Relay slot unavailable, skipping submission");
        return None;
    }
    match try_submit(ctx, signer, relay, safe.address, to, data, value, sponsored)
        .await
    {
        Ok(task_id) => {
            if !ctx.complete_relay(epoch, &task_id) {
                tracing::warn!(
                    task_id = %task_id,
                    "Discarding relay acknowledgement that arrived after a state reset",
                );
                return None;
            }
            tracing::event!(
                target: crate::probe::TARGET,
                tracing::Level::DEBUG,
                kind = %crate::probe::Kind::RelayTx,
                task_id = %task_id,
            );
            ctx.emit(SessionEvent::RelaySubmitted);
            Some(task_id)
        }
        Err(e) => {
            tracing::warn!("Relay submission failed: {}", e);
            ctx.abort_relay(epoch);
            None
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn try_submit(
    ctx: &SessionContext,
    signer: &dyn BundleSigner,
    relay: &dyn Relay,
    safe: Address,
    to: Address,
    data: Bytes,
    value: U256,
    sponsored: bool,
) -> Result<String> {
    let chain = ctx.chain()?;
    let chain_id = chain.numeric_id()?;
    let transactions = vec![MetaTransaction { to, data, value }];
    let options = RelayOptions { sponsored };
    let bundle = signer
        .sign_bundle(chain_id, safe, &transactions, &options)
        .await?;
    relay.execute(bundle).await
}

/// Relay a registry call that creates an organization with the session's
/// derived id. Sponsored, no value.
pub async fn create_organization(
    ctx: &SessionContext,
    signer: &dyn BundleSigner,
    relay: &dyn Relay,
    name: &str,
    description: &str,
) -> Option<String> {
    let org = ctx.org();
    let Some(org_id) = org.org_id else {
        tracing::debug!("No organization id derived, nothing to create");
        return None;
    };
    let call = SetOrganizationCall {
        id: org_id,
        name: name.to_string(),
        description: description.to_string(),
    };
    let registry = ctx.config().registry.address;
    submit(ctx, signer, relay, registry, call.encode().into(), U256::zero(), true)
        .await
}

/// Relay a registry call that joins the session's derived organization.
/// Sponsored, no value.
pub async fn join_organization(
    ctx: &SessionContext,
    signer: &dyn BundleSigner,
    relay: &dyn Relay,
) -> Option<String> {
    let org = ctx.org();
    let Some(org_id) = org.org_id else {
        tracing::debug!("No organization id derived, nothing to join");
        return None;
    };
    let call = JoinOrganizationCall { org_id };
    let registry = ctx.config().registry.address;
    submit(ctx, signer, relay, registry, call.encode().into(), U256::zero(), true)
        .await
}

/// Relay the proposals-enabling call on the session's organization
/// contract. Gas is sponsored; the stake itself is native value paid by
/// the smart account.
pub async fn allow_proposals(
    ctx: &SessionContext,
    signer: &dyn BundleSigner,
    relay: &dyn Relay,
) -> Option<String> {
    let Some(org_address) = ctx.org().org_address else {
        tracing::debug!("Organization contract unknown, cannot enable proposals");
        return None;
    };
    let call = SetProposalsAllowedCall { allowed: true };
    submit(
        ctx,
        signer,
        relay,
        org_address,
        call.encode().into(),
        config::proposals_stake(),
        true,
    )
    .await
}

/// Whether a smart-account balance covers the proposals stake.
pub fn meets_proposals_stake(balance: U256) -> bool {
    balance >= config::proposals_stake()
}
