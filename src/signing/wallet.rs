use crate::error::{Result, WalterError};
use ethers::signers::{LocalWallet, Signer as EthersSigner};
use ethers::types::{Address, Signature, H256};
use tracing::info;
use zeroize::Zeroize;

/// API wallet used to sign exchange actions
///
/// The private key is only held long enough to build the signer, then zeroized.
#[derive(Clone)]
pub struct Wallet {
    inner: LocalWallet,
}

impl Wallet {
    /// Create a wallet from a private key hex string
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        // Remove 0x prefix if present
        let mut secure_key = private_key.trim().trim_start_matches("0x").to_string();

        let parsed = secure_key
            .parse::<LocalWallet>()
            .map_err(|e| WalterError::Wallet(format!("Invalid private key: {}", e)));

        secure_key.zeroize();
        let wallet = parsed?;

        info!("API wallet initialized: {:?}", wallet.address());

        Ok(Self { inner: wallet })
    }

    /// Get the wallet address
    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// Sign a 32-byte digest without any message prefix
    pub fn sign_hash(&self, hash: H256) -> Result<Signature> {
        self.inner
            .sign_hash(hash)
            .map_err(|e| WalterError::Signature(format!("Failed to sign hash: {}", e)))
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish()
    }
}
