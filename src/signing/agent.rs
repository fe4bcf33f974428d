//! L1 action signing for the Hyperliquid exchange endpoint.
//!
//! Actions are msgpack-encoded, hashed together with the nonce and vault flag,
//! and the hash is signed as the `connectionId` of an EIP-712 "phantom agent".

use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::config::Network;
use crate::error::Result;
use crate::signing::Wallet;

/// EIP-712 domain name of the exchange
pub const EXCHANGE_DOMAIN_NAME: &str = "Exchange";
/// EIP-712 domain version
pub const EXCHANGE_DOMAIN_VERSION: &str = "1";
/// Chain id fixed by the exchange for L1 actions
pub const EXCHANGE_CHAIN_ID: u64 = 1337;

/// EIP-712 domain used for L1 actions
#[derive(Debug, Clone)]
pub struct ExchangeDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Default for ExchangeDomain {
    fn default() -> Self {
        Self {
            name: EXCHANGE_DOMAIN_NAME.to_string(),
            version: EXCHANGE_DOMAIN_VERSION.to_string(),
            chain_id: EXCHANGE_CHAIN_ID,
            verifying_contract: Address::zero(),
        }
    }
}

impl ExchangeDomain {
    /// Compute the EIP-712 domain separator hash
    pub fn separator_hash(&self) -> [u8; 32] {
        let type_hash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );

        let mut encoded = Vec::with_capacity(160);
        encoded.extend_from_slice(&type_hash);
        encoded.extend_from_slice(&keccak256(self.name.as_bytes()));
        encoded.extend_from_slice(&keccak256(self.version.as_bytes()));
        encoded.extend_from_slice(&ethers::abi::encode(&[ethers::abi::Token::Uint(
            U256::from(self.chain_id),
        )]));
        // address is left-padded to 32 bytes
        encoded.extend_from_slice(&[0u8; 12]);
        encoded.extend_from_slice(self.verifying_contract.as_bytes());

        keccak256(&encoded)
    }
}

/// The `Agent(string source,bytes32 connectionId)` struct
#[derive(Debug, Clone)]
pub struct PhantomAgent {
    pub source: String,
    pub connection_id: [u8; 32],
}

impl PhantomAgent {
    pub fn new(action_hash: [u8; 32], network: Network) -> Self {
        Self {
            source: network.agent_source().to_string(),
            connection_id: action_hash,
        }
    }

    /// Compute the EIP-712 struct hash
    pub fn struct_hash(&self) -> [u8; 32] {
        let type_hash = keccak256(b"Agent(string source,bytes32 connectionId)");

        let mut encoded = Vec::with_capacity(96);
        encoded.extend_from_slice(&type_hash);
        encoded.extend_from_slice(&keccak256(self.source.as_bytes()));
        encoded.extend_from_slice(&self.connection_id);

        keccak256(&encoded)
    }

    /// Compute the full EIP-712 hash to sign
    pub fn signing_hash(&self, domain: &ExchangeDomain) -> [u8; 32] {
        let mut encoded = Vec::with_capacity(66);
        encoded.extend_from_slice(b"\x19\x01");
        encoded.extend_from_slice(&domain.separator_hash());
        encoded.extend_from_slice(&self.struct_hash());

        keccak256(&encoded)
    }
}

/// keccak256(msgpack(action) || nonce_be || vault flag [|| vault address])
pub fn action_hash<T: Serialize>(action: &T, nonce: u64, vault: Option<Address>) -> Result<[u8; 32]> {
    let mut bytes = rmp_serde::to_vec_named(action)?;
    bytes.extend_from_slice(&nonce.to_be_bytes());
    match vault {
        None => bytes.push(0),
        Some(address) => {
            bytes.push(1);
            bytes.extend_from_slice(address.as_bytes());
        }
    }
    Ok(keccak256(&bytes))
}

/// Signature in the `{r, s, v}` shape the exchange accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSignature {
    pub r: String,
    pub s: String,
    pub v: u64,
}

impl From<&Signature> for WireSignature {
    fn from(signature: &Signature) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        signature.r.to_big_endian(&mut r);
        signature.s.to_big_endian(&mut s);
        Self {
            r: format!("0x{}", hex::encode(r)),
            s: format!("0x{}", hex::encode(s)),
            v: signature.v,
        }
    }
}

/// Sign an L1 action with the API wallet
pub fn sign_l1_action<T: Serialize>(
    wallet: &Wallet,
    action: &T,
    nonce: u64,
    vault: Option<Address>,
    network: Network,
) -> Result<Signature> {
    let connection_id = action_hash(action, nonce, vault)?;
    let agent = PhantomAgent::new(connection_id, network);
    let hash = agent.signing_hash(&ExchangeDomain::default());
    wallet.sign_hash(H256::from(hash))
}
