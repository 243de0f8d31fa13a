use derive_more::Display;

/// The target used for all probe events, so they can be filtered out of the
/// regular log stream and parsed by tooling.
pub const TARGET: &str = "sf_probe";

/// The Kind of the Probe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// When the Lifecycle of the session changes, like login, logout or a
    /// chain switch.
    #[display(fmt = "lifecycle")]
    Lifecycle,
    /// Organization info sync state against the registry contract.
    #[display(fmt = "sync")]
    Sync,
    /// Relaying a transaction state.
    #[display(fmt = "relay_tx")]
    RelayTx,
}
