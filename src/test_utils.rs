//! In-memory fakes for the capability traits, shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use ethers::utils::keccak256;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::auth::{AuthenticatedUser, IdentityProvider};
use crate::contracts::{ChainReader, RawOrgInfo};
use crate::error::{Error, Result};
use crate::relay::{
    BundleSigner, MetaTransaction, Relay, RelayOptions, SignedBundle,
};

/// Set up a test logger, once per process. Safe to call from every test.
pub fn setup_logger() {
    let log_level = tracing::Level::TRACE;
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(
            format!("superfundrs_client={}", log_level)
                .parse()
                .unwrap(),
        );
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .without_time()
        .with_max_level(log_level)
        .with_env_filter(env_filter)
        .with_test_writer()
        .compact()
        .try_init();
}

/// A chain whose registry and organization contracts live in hash maps.
#[derive(Default)]
pub struct MockChain {
    orgs: RwLock<HashMap<String, (Address, RawOrgInfo)>>,
    allowed: RwLock<HashMap<Address, bool>>,
    balances: RwLock<HashMap<Address, U256>>,
    fail: AtomicBool,
}

impl MockChain {
    /// Register an organization, returning its (deterministic) address.
    pub fn register_org(
        &self,
        id: &str,
        name: &str,
        description: &str,
    ) -> Address {
        let address = Address::from_slice(&keccak256(id.as_bytes())[..20]);
        let info = RawOrgInfo {
            just_same_org_id: id.to_string(),
            proposals: vec![],
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        };
        self.orgs.write().insert(id.to_string(), (address, info));
        address
    }

    pub fn set_allowed(&self, org: Address, allowed: bool) {
        self.allowed.write().insert(org, allowed);
    }

    pub fn set_balance(&self, account: Address, balance: U256) {
        self.balances.write().insert(account, balance);
    }

    /// Make every read fail until called again with `false`.
    pub fn fail_reads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(Error::Generic("rpc unreachable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn org_address(&self, org_id: &str) -> Result<Address> {
        self.check()?;
        Ok(self
            .orgs
            .read()
            .get(org_id)
            .map(|(address, _)| *address)
            .unwrap_or_else(Address::zero))
    }

    async fn org_info(&self, org_id: &str) -> Result<RawOrgInfo> {
        self.check()?;
        self.orgs
            .read()
            .get(org_id)
            .map(|(_, info)| info.clone())
            .ok_or(Error::Generic("org not registered"))
    }

    async fn orgs_count(&self) -> Result<U256> {
        self.check()?;
        Ok(U256::from(self.orgs.read().len()))
    }

    async fn user_orgs(&self, _user: Address) -> Result<Vec<Address>> {
        self.check()?;
        Ok(self
            .orgs
            .read()
            .values()
            .map(|(address, _)| *address)
            .collect())
    }

    async fn proposals_allowed(&self, org: Address) -> Result<bool> {
        self.check()?;
        Ok(self.allowed.read().get(&org).copied().unwrap_or(false))
    }

    async fn user_balance(&self, _org: Address, user: Address) -> Result<U256> {
        self.check()?;
        Ok(self.balances.read().get(&user).copied().unwrap_or_default())
    }

    async fn org_balance(&self, org: Address) -> Result<U256> {
        self.check()?;
        Ok(self.balances.read().get(&org).copied().unwrap_or_default())
    }

    async fn native_balance(&self, account: Address) -> Result<U256> {
        self.check()?;
        Ok(self
            .balances
            .read()
            .get(&account)
            .copied()
            .unwrap_or_default())
    }
}

/// An identity provider with a scripted user and optional failure modes.
pub struct MockIdentity {
    user: AuthenticatedUser,
    pub connected: AtomicBool,
    pub fail_sign_in: AtomicBool,
    pub fail_sign_out: AtomicBool,
    pub sign_outs: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockIdentity {
    pub fn with_user(email: &str, owner: Address, safes: Vec<Address>) -> Self {
        Self {
            user: AuthenticatedUser {
                owner,
                safes,
                email: email.to_string(),
            },
            connected: AtomicBool::new(false),
            fail_sign_in: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            sign_outs: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    /// Park the next `sign_in` until the returned handle is notified.
    pub fn gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl IdentityProvider for MockIdentity {
    async fn sign_in(&self) -> Result<AuthenticatedUser> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_sign_in.load(Ordering::SeqCst) {
            return Err(Error::Auth("user closed the sign-in dialog".into()));
        }
        Ok(self.user.clone())
    }

    async fn sign_out(&self) -> Result<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(Error::Auth("provider session already gone".into()));
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A relay that acknowledges with `task-N` and remembers the last bundle.
#[derive(Default)]
pub struct MockRelay {
    pub executions: AtomicUsize,
    pub fail: AtomicBool,
    pub last_bundle: Mutex<Option<SignedBundle>>,
    counter: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockRelay {
    /// Park the next `execute` until the returned handle is notified.
    pub fn gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl Relay for MockRelay {
    async fn execute(&self, bundle: SignedBundle) -> Result<String> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Relay("relay rejected the bundle".into()));
        }
        *self.last_bundle.lock() = Some(bundle);
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("task-{}", n))
    }
}

/// A signer that produces a fixed-byte signature without a key.
pub struct MockSigner;

#[async_trait]
impl BundleSigner for MockSigner {
    async fn sign_bundle(
        &self,
        chain_id: u64,
        safe: Address,
        transactions: &[MetaTransaction],
        options: &RelayOptions,
    ) -> Result<SignedBundle> {
        Ok(SignedBundle {
            chain_id,
            safe,
            transactions: transactions.to_vec(),
            signature: Bytes::from(vec![0xaa; 65]),
            sponsored: options.sponsored,
        })
    }
}
