//! The on-chain read surface of the registry and organization contracts,
//! behind a narrow capability trait so the core never depends on a
//! concrete RPC stack.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, U256};

use crate::config::ChainConfig;
use crate::error::Result;

abigen!(
    SuperFundrsContract,
    r#"[
        function getOrgFromId(string orgId) view returns (address)
        function getOrgInfoFromId(string orgId) view returns (string justSameOrgId, uint256[] proposals, string id, string name, string description)
        function getOrgsCount() view returns (uint256)
        function getUserOrgs() view returns (address[])
        function setOrganization(string id, string name, string description)
        function joinOrganization(string orgId)
    ]"#
);

abigen!(
    OrganizationContract,
    r#"[
        function proposalsAllowed() view returns (bool)
        function getUserBalance() view returns (uint256)
        function getBalance() view returns (uint256)
        function setProposalsAllowed(bool allowed) payable
    ]"#
);

/// Raw organization info, exactly as the registry returns it.
#[derive(Debug, Clone, Default)]
pub struct RawOrgInfo {
    /// Echo of the queried org id.
    pub just_same_org_id: String,
    /// Proposal ids raised so far.
    pub proposals: Vec<U256>,
    /// The organization id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
}

/// Read-only chain access used by the organization session state and the
/// balance poller. One concrete adapter per RPC stack; the core only
/// depends on this trait.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Registry: the organization contract address for an org id, the zero
    /// address when none is registered.
    async fn org_address(&self, org_id: &str) -> Result<Address>;
    /// Registry: descriptive info for an org id.
    async fn org_info(&self, org_id: &str) -> Result<RawOrgInfo>;
    /// Registry: how many organizations are registered.
    async fn orgs_count(&self) -> Result<U256>;
    /// Registry: the organizations the given user joined.
    async fn user_orgs(&self, user: Address) -> Result<Vec<Address>>;
    /// Organization: whether proposals are currently allowed.
    async fn proposals_allowed(&self, org: Address) -> Result<bool>;
    /// Organization: the balance the contract tracks for the given user.
    async fn user_balance(&self, org: Address, user: Address) -> Result<U256>;
    /// Organization: the contract's own balance.
    async fn org_balance(&self, org: Address) -> Result<U256>;
    /// The native token balance of any account.
    async fn native_balance(&self, account: Address) -> Result<U256>;
}

/// Build an RPC provider for a chain.
pub fn evm_provider(chain: &ChainConfig) -> Result<Provider<Http>> {
    let provider = Provider::try_from(chain.rpc_url.as_str())?
        .interval(Duration::from_millis(5u64));
    Ok(provider)
}

/// [`ChainReader`] over an ethers Http provider.
#[derive(Debug, Clone)]
pub struct EthersReader {
    client: Arc<Provider<Http>>,
    registry: Address,
}

impl EthersReader {
    /// Create a reader for the given chain, pointed at the registry
    /// contract.
    pub fn new(chain: &ChainConfig, registry: Address) -> Result<Self> {
        let client = Arc::new(evm_provider(chain)?);
        Ok(Self { client, registry })
    }

    fn registry_contract(&self) -> SuperFundrsContract<Provider<Http>> {
        SuperFundrsContract::new(self.registry, self.client.clone())
    }

    fn org_contract(&self, org: Address) -> OrganizationContract<Provider<Http>> {
        OrganizationContract::new(org, self.client.clone())
    }
}

#[async_trait]
impl ChainReader for EthersReader {
    async fn org_address(&self, org_id: &str) -> Result<Address> {
        let address = self
            .registry_contract()
            .get_org_from_id(org_id.to_string())
            .call()
            .await?;
        Ok(address)
    }

    async fn org_info(&self, org_id: &str) -> Result<RawOrgInfo> {
        let (just_same_org_id, proposals, id, name, description) = self
            .registry_contract()
            .get_org_info_from_id(org_id.to_string())
            .call()
            .await?;
        Ok(RawOrgInfo {
            just_same_org_id,
            proposals,
            id,
            name,
            description,
        })
    }

    async fn orgs_count(&self) -> Result<U256> {
        Ok(self.registry_contract().get_orgs_count().call().await?)
    }

    async fn user_orgs(&self, user: Address) -> Result<Vec<Address>> {
        // the registry resolves the caller, so the read is made from the
        // user's address.
        let orgs = self
            .registry_contract()
            .get_user_orgs()
            .from(user)
            .call()
            .await?;
        Ok(orgs)
    }

    async fn proposals_allowed(&self, org: Address) -> Result<bool> {
        Ok(self.org_contract(org).proposals_allowed().call().await?)
    }

    async fn user_balance(&self, org: Address, user: Address) -> Result<U256> {
        let balance = self
            .org_contract(org)
            .get_user_balance()
            .from(user)
            .call()
            .await?;
        Ok(balance)
    }

    async fn org_balance(&self, org: Address) -> Result<U256> {
        Ok(self.org_contract(org).get_balance().call().await?)
    }

    async fn native_balance(&self, account: Address) -> Result<U256> {
        let balance = self.client.get_balance(account, None).await?;
        Ok(balance)
    }
}
