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
//
use std::collections::HashMap;
use std::path::Path;

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_initial_chain() -> String {
    "0x5".to_string()
}

const fn default_salt_nonce() -> u64 {
    0
}

/// SuperfundrsConfig is the top-level configuration of the session
/// orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SuperfundrsConfig {
    /// The chain the session starts on, before the user picks one.
    ///
    /// default to Görli ("0x5")
    #[serde(default = "default_initial_chain")]
    pub initial_chain: String,
    /// Supported chains and their metadata.
    ///
    /// a map between chain id (hex string, e.g. "0x5") and its
    /// configuration.
    #[serde(default = "default_chains")]
    pub chains: HashMap<String, ChainConfig>,
    /// The SuperFundrs registry contract.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Relay service options.
    #[serde(default)]
    pub relay: RelayConfig,
    /// The Safe deployment used to derive counterfactual addresses.
    #[serde(default)]
    pub deployment: SafeDeploymentConfig,
}

impl Default for SuperfundrsConfig {
    fn default() -> Self {
        Self {
            initial_chain: default_initial_chain(),
            chains: default_chains(),
            registry: Default::default(),
            relay: Default::default(),
            deployment: Default::default(),
        }
    }
}

/// ChainConfig is the static metadata of one supported chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    /// chain specific id, as a hex string (e.g. "0x5").
    pub id: String,
    /// Human readable chain name.
    pub label: String,
    /// Short name used in address prefixes (e.g. "gor").
    pub short_name: String,
    /// The native currency symbol of this chain.
    pub currency: String,
    /// Http(s) RPC Endpoint for quick Req/Res
    #[serde(skip_serializing)]
    pub rpc_url: url::Url,
    /// Block Explorer for this chain.
    ///
    /// Optional, and only used for printing a clickable links
    /// for transactions and contracts.
    #[serde(skip_serializing)]
    pub explorer: Option<url::Url>,
    /// The Safe transaction service for this chain.
    #[serde(skip_serializing)]
    pub transaction_service_url: url::Url,
    /// The meta-transaction relay endpoint for this chain.
    #[serde(skip_serializing)]
    pub relay_endpoint: url::Url,
}

impl ChainConfig {
    /// The chain id as the number the wire protocols want.
    pub fn numeric_id(&self) -> Result<u64> {
        let raw = self.id.trim_start_matches("0x");
        u64::from_str_radix(raw, 16)
            .map_err(|_| Error::Generic("invalid hex chain id"))
    }
}

/// RegistryConfig points at the deployed SuperFundrs registry contract.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    /// The address of the registry contract.
    #[serde(default)]
    pub address: Address,
}

/// RelayConfig is the configuration for the meta-transaction relay.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayConfig {
    /// The sponsor api key, required for sponsored (gasless) calls.
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
}

/// SafeDeploymentConfig fixes the factory configuration used for the
/// counterfactual address derivation of not-yet-deployed Safes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SafeDeploymentConfig {
    /// The Safe proxy factory.
    pub proxy_factory: Address,
    /// The Safe singleton (master copy) the proxy delegates to.
    pub singleton: Address,
    /// Fixed salt nonce mixed into the derivation.
    #[serde(default = "default_salt_nonce")]
    pub salt_nonce: u64,
}

impl Default for SafeDeploymentConfig {
    fn default() -> Self {
        // canonical Safe 1.3.0 deployment, same addresses on every chain.
        Self {
            proxy_factory: addr("0xa6B71E26C5e0845f74c812102Ca7114b6a896AB2"),
            singleton: addr("0xd9Db270c1B5E3Bd161E8c8503c55cEABeE709552"),
            salt_nonce: default_salt_nonce(),
        }
    }
}

fn addr(s: &str) -> Address {
    s.parse().expect("static address")
}

fn chain_url(s: &str) -> url::Url {
    s.parse().expect("static url")
}

/// The built-in chain registry, mirroring the set of chains the dApp ships
/// with. Config files may extend or override it.
pub fn default_chains() -> HashMap<String, ChainConfig> {
    let mut chains = HashMap::new();
    chains.insert(
        "0x5".to_string(),
        ChainConfig {
            id: "0x5".to_string(),
            label: "Görli".to_string(),
            short_name: "gor".to_string(),
            currency: "gETH".to_string(),
            rpc_url: chain_url("https://rpc.ankr.com/eth_goerli"),
            explorer: Some(chain_url("https://goerli.etherscan.io")),
            transaction_service_url: chain_url(
                "https://safe-transaction-goerli.safe.global",
            ),
            relay_endpoint: chain_url("https://relay.gelato.digital"),
        },
    );
    chains.insert(
        "0x64".to_string(),
        ChainConfig {
            id: "0x64".to_string(),
            label: "Gnosis Chain".to_string(),
            short_name: "gno".to_string(),
            currency: "xDai".to_string(),
            rpc_url: chain_url("https://rpc.gnosischain.com"),
            explorer: Some(chain_url("https://gnosisscan.io")),
            transaction_service_url: chain_url(
                "https://safe-transaction-gnosis-chain.safe.global",
            ),
            relay_endpoint: chain_url("https://relay.gelato.digital"),
        },
    );
    chains
}

/// The stake (in wei) a caller must attach when enabling proposals on an
/// organization contract. The check against the caller's balance is
/// advisory; the contract enforces the real constraint on-chain.
pub fn proposals_stake() -> U256 {
    // 0.2 native-token units.
    U256::exp10(17) * 2
}

/// Load the configuration from all toml or json files in the given
/// directory and its subdirectories, then merge in the environment
/// (with a prefix of SF).
pub fn load<P: AsRef<Path>>(path: P) -> Result<SuperfundrsConfig> {
    let mut cfg = config::Config::new();
    // A pattern that covers all toml or json files in the config directory
    // and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", path.as_ref().display());
    let json_pattern = format!("{}/**/*.json", path.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let config_files = glob::glob(&toml_pattern)?
        .flatten()
        .chain(glob::glob(&json_pattern)?.flatten());
    for config_file in config_files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        let file = config::File::from(config_file).format(format);
        if let Err(e) = cfg.merge(file) {
            tracing::warn!("Error while loading config file: {} skipping!", e);
            continue;
        }
    }
    cfg.merge(config::Environment::with_prefix("SF").separator("_"))?;
    let config: SuperfundrsConfig = serde_path_to_error::deserialize(cfg)?;
    postloading_process(config)
}

// The postloading_process exists to validate the configuration before the
// session context is built on top of it.
fn postloading_process(
    config: SuperfundrsConfig,
) -> Result<SuperfundrsConfig> {
    tracing::trace!("Checking configration sanity ...");
    if !config.chains.contains_key(&config.initial_chain) {
        return Err(Error::ChainNotFound {
            chain_id: config.initial_chain.clone(),
        });
    }
    for (chain_id, chain) in &config.chains {
        if chain.id != *chain_id {
            tracing::warn!(
                "chain {} is keyed under {} in the config, the key wins",
                chain.id,
                chain_id,
            );
        }
    }
    if config.registry.address == Address::zero() {
        tracing::warn!(
            "no registry contract configured, organization lookups will fail"
        );
    }
    Ok(config)
}
