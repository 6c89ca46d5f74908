//! Key management and envelope crypto for the agent.
//!
//! The agent core only ever talks to the [`CryptoProvider`] and
//! [`IdentityStore`] traits; the in-memory [`Wallet`] in this crate is the
//! reference implementation backing both. Wallets are created and opened
//! through a [`WalletDirectory`], which models the create/open/delete
//! lifecycle (including the benign "already exists" outcome) without
//! touching the filesystem.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod store;

pub use error::WalletError;
pub use store::{Wallet, WalletDirectory};

/// Result of unpacking an authenticated-encryption envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedEnvelope {
    /// The decrypted wire text of the message.
    pub message: String,
    /// The verkey the envelope was addressed to (always one of ours).
    pub recipient_verkey: String,
    /// The sender verkey, absent for anonymous envelopes.
    pub sender_verkey: Option<String>,
}

/// A pairwise relationship record established after a successful handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseInfo {
    pub my_did: String,
    pub their_did: String,
    pub their_vk: String,
    pub their_endpoint: String,
}

/// Signing, verification and envelope packing capability.
///
/// Every call is treated as potentially I/O-bound by the agent loop, so the
/// whole interface is async even though the reference wallet is in-memory.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// Sign `data` with the secret key behind `signer_vk`.
    async fn sign(&self, signer_vk: &str, data: &[u8]) -> Result<Vec<u8>, WalletError>;

    /// Verify `signature` over `data` against `signer_vk`.
    ///
    /// A signature that does not check out is `Ok(false)`, not an error;
    /// so are undecodable verkeys and signature bytes. Errors are reserved
    /// for wallet-internal failures.
    async fn verify(
        &self,
        signer_vk: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, WalletError>;

    /// Pack `plaintext` into a wire envelope for `recipient_vks`.
    ///
    /// With `sender_vk` set the envelope is sender-authenticated; without
    /// it the envelope is anonymous. The choice is part of the protocol
    /// contract and is always made by the caller.
    async fn pack_envelope(
        &self,
        plaintext: &str,
        recipient_vks: &[String],
        sender_vk: Option<&str>,
    ) -> Result<Vec<u8>, WalletError>;

    /// Unpack a wire envelope addressed to one of this wallet's keys.
    async fn unpack_envelope(&self, wire: &[u8]) -> Result<UnpackedEnvelope, WalletError>;

    /// Create a fresh keypair and return its verkey.
    async fn create_key(&self) -> Result<String, WalletError>;

    /// Create a fresh local identity and return `(did, verkey)`.
    async fn create_local_identity(&self) -> Result<(String, String), WalletError>;
}

/// Resolution of verkeys, DIDs and pairwise relationships.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Resolve a verkey to a known DID. `Ok(None)` is a legitimate outcome
    /// for keys the wallet has never seen attached to an identity.
    async fn did_for_key(&self, verkey: &str) -> Result<Option<String>, WalletError>;

    /// Look up the verkey of a local DID.
    async fn key_for_local_did(&self, did: &str) -> Result<String, WalletError>;

    /// Look up the pairwise record for a peer DID.
    async fn pairwise_info(&self, their_did: &str) -> Result<PairwiseInfo, WalletError>;

    /// Store the pairwise record produced by a completed handshake.
    async fn store_pairwise(&self, record: PairwiseInfo) -> Result<(), WalletError>;
}
