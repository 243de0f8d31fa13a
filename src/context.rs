use ethers::types::Address;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::config::{ChainConfig, SuperfundrsConfig};
use crate::error::{Error, Result};
use crate::org::{self, OrgInfo, OrgState};
use crate::relay::{RelayStatus, RelayTask};

/// Events emitted by the [`SessionContext`] whenever one of its owned
/// pieces of state changes in a way other components care about. Every
/// cross-component trigger is an explicit subscription on this bus.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The selected chain changed. All dependent state has been reset.
    ChainChanged {
        /// The newly selected chain id.
        chain_id: String,
    },
    /// A signing identity was established.
    LoggedIn,
    /// The signing identity was torn down.
    LoggedOut,
    /// The session email was relabeled in-session.
    EmailChanged,
    /// An organization id hint from the URL was applied.
    OrgHintApplied,
    /// A relay submission was accepted and has a task id.
    RelaySubmitted,
}

/// The authenticated signing identity, if any.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// The owner (externally-owned account) address.
    pub owner: Option<Address>,
    /// The email the identity provider reported for the owner.
    pub email: Option<String>,
    /// The currently selected chain id (hex string).
    pub chain_id: String,
    /// Safes the identity provider already knows for this owner.
    pub safes: Vec<Address>,
}

impl Session {
    /// An authenticated session has an owner on a selected chain.
    pub fn is_authenticated(&self) -> bool {
        self.owner.is_some() && !self.chain_id.is_empty()
    }
}

/// The smart account the session acts as. Exactly one is selected at a
/// time; it is memoized per (owner, chain) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedSafe {
    /// The Safe address (possibly counterfactual).
    pub address: Address,
    /// The owner this selection was made for.
    pub owner: Address,
    /// Whether the Safe is known to be deployed. `None` until the first
    /// on-chain interaction tells us.
    pub deployed: Option<bool>,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Generation counter, bumped on every chain switch and logout. Async
    /// continuations capture it before suspending and must find it
    /// unchanged before writing results back.
    epoch: u64,
    session: Session,
    safe: Option<SelectedSafe>,
    org: OrgState,
    relay: RelayTask,
}

/// The single owner of all mutable session state: the signing session, the
/// selected smart account, the organization context and the relay task.
///
/// Readers get snapshots; every mutation goes through a named entry point
/// here, and interested components subscribe to [`SessionEvent`]s instead
/// of poking at each other's state.
pub struct SessionContext {
    config: SuperfundrsConfig,
    state: RwLock<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    /// Broadcasts a shutdown signal to all background tasks (the org
    /// refresher and any pollers). A `()` value is sent once; each task
    /// receives it, reaches a safe terminal state, and completes.
    notify_shutdown: broadcast::Sender<()>,
}

impl SessionContext {
    /// Create a new context starting on the configured initial chain.
    pub fn new(config: SuperfundrsConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        let (notify_shutdown, _) = broadcast::channel(2);
        let state = SessionState {
            session: Session {
                chain_id: config.initial_chain.clone(),
                ..Default::default()
            },
            ..Default::default()
        };
        Self {
            config,
            state: RwLock::new(state),
            events,
            notify_shutdown,
        }
    }

    /// The static configuration this context was built with.
    pub fn config(&self) -> &SuperfundrsConfig {
        &self.config
    }

    /// The configuration of the currently selected chain.
    pub fn chain(&self) -> Result<ChainConfig> {
        let chain_id = self.state.read().session.chain_id.clone();
        self.chain_by_id(&chain_id)
    }

    /// Pure registry lookup by chain id.
    pub fn chain_by_id(&self, chain_id: &str) -> Result<ChainConfig> {
        self.config.chains.get(chain_id).cloned().ok_or_else(|| {
            Error::ChainNotFound {
                chain_id: chain_id.to_string(),
            }
        })
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Signal all background tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// A handle for background tasks to listen for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// The current state generation.
    pub fn epoch(&self) -> u64 {
        self.state.read().epoch
    }

    /// Whether a previously captured epoch still describes the current
    /// state. Async continuations call this before applying their results;
    /// a stale continuation must discard them.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.state.read().epoch == epoch
    }

    /// Snapshot of the signing session.
    pub fn session(&self) -> Session {
        self.state.read().session.clone()
    }

    /// Snapshot of the selected smart account, if one is resolved.
    pub fn selected_safe(&self) -> Option<SelectedSafe> {
        self.state.read().safe
    }

    /// Snapshot of the organization context.
    pub fn org(&self) -> OrgState {
        self.state.read().org.clone()
    }

    /// Snapshot of the relay task slot.
    pub fn relay_task(&self) -> RelayTask {
        self.state.read().relay.clone()
    }

    /// Switch the session to another chain.
    ///
    /// This fully resets the session, smart-account selection, the
    /// organization context and the relay task. No stale cross-chain state
    /// survives a switch; results of operations started before the switch
    /// are discarded when they land (see [`Self::is_current`]).
    pub fn switch_chain(&self, chain_id: &str) -> Result<()> {
        // validate before touching anything.
        let chain = self.chain_by_id(chain_id)?;
        {
            let mut state = self.state.write();
            state.epoch += 1;
            state.session = Session {
                chain_id: chain.id.clone(),
                ..Default::default()
            };
            state.safe = None;
            state.org = OrgState::default();
            state.relay = RelayTask::default();
        }
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::Lifecycle,
            chain_switched = %chain_id,
        );
        self.emit(SessionEvent::ChainChanged {
            chain_id: chain_id.to_string(),
        });
        Ok(())
    }

    /// Populate the session from a fresh sign-in. The selected safe was
    /// resolved by the caller ([`crate::auth::login`]), which is the only
    /// place allowed to replace it.
    pub(crate) fn apply_login(
        &self,
        owner: Address,
        safes: Vec<Address>,
        email: &str,
        selected: SelectedSafe,
    ) {
        let mut state = self.state.write();
        state.session.owner = Some(owner);
        state.session.safes = safes;
        state.session.email = Some(email.to_string());
        state.safe = Some(selected);
        Self::relabel(&mut state.org, email);
    }

    /// Relabel the session email and re-derive the organization identity.
    pub(crate) fn relabel_email(&self, email: &str) {
        let mut state = self.state.write();
        state.session.email = Some(email.to_string());
        Self::relabel(&mut state.org, email);
    }

    fn relabel(org: &mut OrgState, email: &str) {
        let identity = org::derive_org_id(email);
        org.email = email.to_string();
        // the admin flag only ever comes from the email local-part.
        org.is_admin = identity.is_admin;
        // a URL-pinned org id takes precedence for the whole session.
        if !org.url_pinned {
            org.org_id = if identity.org_id.is_empty() {
                None
            } else {
                Some(identity.org_id)
            };
        }
    }

    /// Pin the organization id supplied through the URL. The hint never
    /// grants the admin flag.
    pub(crate) fn pin_org_id(&self, org_id: &str) {
        let mut state = self.state.write();
        state.org.org_id = Some(org_id.to_string());
        state.org.url_pinned = true;
        state.org.is_admin = false;
    }

    /// Tear down the authenticated session and everything derived from it.
    /// Bumps the epoch so in-flight continuations from the old session
    /// discard their results.
    pub(crate) fn clear_session(&self) {
        let mut state = self.state.write();
        let chain_id = state.session.chain_id.clone();
        state.epoch += 1;
        state.session = Session {
            chain_id,
            ..Default::default()
        };
        state.safe = None;
        state.org = OrgState::default();
        state.relay = RelayTask::default();
    }

    /// Apply the results of an organization refresh, atomically from the
    /// readers' point of view. Returns false (and applies nothing) if the
    /// results are stale.
    pub(crate) fn apply_org_refresh(
        &self,
        epoch: u64,
        org_address: Option<Address>,
        info: Option<OrgInfo>,
    ) -> bool {
        let mut state = self.state.write();
        if state.epoch != epoch {
            return false;
        }
        state.org.org_address = org_address;
        state.org.info = info;
        true
    }

    /// Claim the relay slot, moving it to `Submitting`. Returns false if
    /// the epoch is no longer current or another submission already holds
    /// the slot.
    pub(crate) fn begin_relay(&self, epoch: u64) -> bool {
        let mut state = self.state.write();
        if state.epoch != epoch
            || state.relay.status == RelayStatus::Submitting
        {
            return false;
        }
        state.relay = RelayTask {
            task_id: None,
            status: RelayStatus::Submitting,
        };
        true
    }

    /// Record an accepted relay task. Stale completions (the chain switched
    /// or the user logged out while the submission was in flight) are
    /// discarded entirely.
    pub(crate) fn complete_relay(&self, epoch: u64, task_id: &str) -> bool {
        let mut state = self.state.write();
        if state.epoch != epoch {
            return false;
        }
        state.relay = RelayTask {
            task_id: Some(task_id.to_string()),
            status: RelayStatus::Pending,
        };
        true
    }

    /// Revert the relay slot to idle after a failed submission.
    pub(crate) fn abort_relay(&self, epoch: u64) -> bool {
        let mut state = self.state.write();
        if state.epoch != epoch {
            return false;
        }
        state.relay = RelayTask::default();
        true
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext").finish()
    }
}

/// Listens for the shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value
/// is ever sent. The `Shutdown` struct listens for the signal and tracks
/// that the signal has been received, so callers may poll it repeatedly.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,
    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }
        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;
        self.shutdown = true;
    }
}
