//! Smart-account ("Safe") resolution.
//!
//! Selection is a pure function of the owner identity, the safes the
//! identity provider already knows, and the chain: reuse the first existing
//! safe, otherwise derive the counterfactual address the Safe proxy factory
//! would deploy to. The counterfactual address is usable for receiving
//! funds before the account exists on-chain.

use ethers::types::{Address, U256};
use ethers::utils::{get_create2_address_from_hash, keccak256};

use crate::config::SafeDeploymentConfig;
use crate::context::SelectedSafe;

/// Commitment to the Safe 1.3.0 proxy creation code. Part of the CREATE2
/// init-code preimage together with the configured singleton.
const PROXY_CREATION_CODE_HASH: [u8; 32] = [
    0xb8, 0x9c, 0x1b, 0x3b, 0xdf, 0x2c, 0xf8, 0x82, 0x78, 0x18, 0x64, 0x6b,
    0xce, 0x9a, 0x8f, 0x6e, 0x37, 0x28, 0x85, 0xf8, 0xc5, 0x5e, 0x5c, 0x07,
    0xac, 0xbd, 0x30, 0x7c, 0xb1, 0x33, 0xb0, 0xd1,
];

/// Select the smart account to act as.
///
/// If the identity already owns safes, the first one is chosen (the
/// provider's order is stable but provider-defined). Otherwise the
/// not-yet-deployed counterfactual address is derived. The caller memoizes
/// the result per (owner, chain) pair; a selection is never silently
/// replaced while that pair is stable.
pub fn resolve(
    owner: Address,
    existing: &[Address],
    chain_id: u64,
    deployment: &SafeDeploymentConfig,
) -> SelectedSafe {
    match existing.first() {
        Some(first) => SelectedSafe {
            address: *first,
            owner,
            deployed: Some(true),
        },
        None => SelectedSafe {
            address: counterfactual_address(owner, chain_id, deployment),
            owner,
            // unknown until the first on-chain interaction.
            deployed: None,
        },
    }
}

/// The deterministic CREATE2 address the proxy factory would deploy a new
/// Safe for this owner to, on this chain.
pub fn counterfactual_address(
    owner: Address,
    chain_id: u64,
    deployment: &SafeDeploymentConfig,
) -> Address {
    // the salt binds the owner, the chain and the fixed nonce, so the same
    // identity gets a different (but stable) address per chain.
    let mut salt_preimage = Vec::with_capacity(20 + 32 + 32);
    salt_preimage.extend_from_slice(owner.as_bytes());
    salt_preimage.extend_from_slice(&u256_bytes(U256::from(chain_id)));
    salt_preimage
        .extend_from_slice(&u256_bytes(U256::from(deployment.salt_nonce)));
    let salt = keccak256(&salt_preimage);

    // the init code commits to the proxy bytecode and the singleton it
    // delegates to.
    let mut singleton = [0u8; 32];
    singleton[12..].copy_from_slice(deployment.singleton.as_bytes());
    let mut init_code = Vec::with_capacity(32 + 32);
    init_code.extend_from_slice(&PROXY_CREATION_CODE_HASH);
    init_code.extend_from_slice(&singleton);
    let init_code_hash = keccak256(&init_code);

    get_create2_address_from_hash(
        deployment.proxy_factory,
        salt,
        init_code_hash,
    )
}

fn u256_bytes(value: U256) -> [u8; 32] {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn prefers_the_first_existing_safe() {
        let deployment = SafeDeploymentConfig::default();
        let existing = vec![owner(10), owner(11)];
        let selected = resolve(owner(1), &existing, 5, &deployment);
        assert_eq!(selected.address, owner(10));
        assert_eq!(selected.deployed, Some(true));
    }

    #[test]
    fn counterfactual_is_deterministic() {
        let deployment = SafeDeploymentConfig::default();
        let a = resolve(owner(1), &[], 5, &deployment);
        let b = resolve(owner(1), &[], 5, &deployment);
        assert_eq!(a.address, b.address);
        assert_eq!(a.deployed, None);
    }

    #[test]
    fn counterfactual_binds_owner_and_chain() {
        let deployment = SafeDeploymentConfig::default();
        let base = counterfactual_address(owner(1), 5, &deployment);
        assert_ne!(base, counterfactual_address(owner(2), 5, &deployment));
        assert_ne!(base, counterfactual_address(owner(1), 100, &deployment));
    }
}
