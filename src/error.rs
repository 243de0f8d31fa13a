use ethers::contract::ContractError;
use ethers::providers::{Http, Provider, ProviderError};
use ethers::signers::WalletError;

/// An enum of all possible errors that could be encountered during the
/// execution of the SuperFundrs session orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ProviderError),
    /// Smart contract error.
    #[error(transparent)]
    EthersContract(#[from] ContractError<Provider<Http>>),
    /// Owner wallet signing error.
    #[error(transparent)]
    Wallet(#[from] WalletError),
    /// Http client error, from talking to the relay service.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Chain not found in the registry.
    #[error("Chain Not Found: {}", chain_id)]
    ChainNotFound {
        /// The chain id of the chain.
        chain_id: String,
    },
    /// The identity provider rejected or cancelled the sign-in.
    #[error("Authentication failed: {}", _0)]
    Auth(String),
    /// The relay service rejected the submission.
    #[error("Relay submission failed: {}", _0)]
    Relay(String),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
}

/// A type alias for the result of the session orchestrator, that uses the
/// `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;
