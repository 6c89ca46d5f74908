//! In-memory reference wallet.
//!
//! Envelope layout is a small JSON document: one AEAD ciphertext per
//! recipient, each encrypted under a key derived from the recipient verkey,
//! plus an optional sender verkey and sender signature over the plaintext.
//! A production provider would substitute real key agreement behind the same
//! [`CryptoProvider`] trait; the agent core never sees the difference.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use log::debug;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::{Mutex, RwLock};

use crate::{CryptoProvider, IdentityStore, PairwiseInfo, UnpackedEnvelope, WalletError};

const ENVELOPE_PROTECTED: &str = "didwire/envelope/1.0";
const ENVELOPE_KEY_INFO: &[u8] = b"didwire envelope v1";

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    protected: String,
    recipients: Vec<WireRecipient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireRecipient {
    to: String,
    nonce: String,
    ciphertext: String,
}

#[derive(Default)]
struct WalletState {
    /// verkey -> secret key bytes
    keys: HashMap<String, [u8; 32]>,
    /// local did -> verkey
    local_dids: HashMap<String, String>,
    /// verkey -> did, for both local identities and known peers
    key_dids: HashMap<String, String>,
    /// their did -> pairwise record
    pairwise: HashMap<String, PairwiseInfo>,
}

struct StoredWallet {
    passphrase: String,
    state: Arc<RwLock<WalletState>>,
}

/// Registry of named wallets, modelling the create/open/delete lifecycle.
///
/// Contents survive close/reopen for as long as the directory itself lives,
/// which is enough to exercise the "already exists" and ephemeral paths.
#[derive(Clone, Default)]
pub struct WalletDirectory {
    inner: Arc<Mutex<HashMap<String, StoredWallet>>>,
}

impl WalletDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty wallet. Creating a name that already exists is an
    /// error; callers that treat it as benign match on
    /// [`WalletError::AlreadyExists`].
    pub async fn create(&self, name: &str, passphrase: &str) -> Result<(), WalletError> {
        let mut wallets = self.inner.lock().await;
        if wallets.contains_key(name) {
            return Err(WalletError::AlreadyExists(name.to_string()));
        }
        wallets.insert(
            name.to_string(),
            StoredWallet {
                passphrase: passphrase.to_string(),
                state: Arc::new(RwLock::new(WalletState::default())),
            },
        );
        Ok(())
    }

    /// Open an existing wallet.
    pub async fn open(&self, name: &str, passphrase: &str) -> Result<Wallet, WalletError> {
        let wallets = self.inner.lock().await;
        let stored = wallets
            .get(name)
            .ok_or_else(|| WalletError::NotFound(name.to_string()))?;
        if stored.passphrase != passphrase {
            return Err(WalletError::BadPassphrase(name.to_string()));
        }
        Ok(Wallet {
            name: name.to_string(),
            state: stored.state.clone(),
        })
    }

    /// Delete a wallet and all of its keys.
    pub async fn delete(&self, name: &str) -> Result<(), WalletError> {
        let mut wallets = self.inner.lock().await;
        wallets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| WalletError::NotFound(name.to_string()))
    }
}

/// An open handle onto a wallet's keys and identity records.
pub struct Wallet {
    name: String,
    state: Arc<RwLock<WalletState>>,
}

impl Wallet {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn envelope_key(verkey: &str) -> Result<[u8; 32], WalletError> {
        let ikm = hex::decode(verkey)?;
        let hk = Hkdf::<Sha256>::new(None, &ikm);
        let mut okm = [0u8; 32];
        hk.expand(ENVELOPE_KEY_INFO, &mut okm)?;
        Ok(okm)
    }

    fn generate_keypair() -> (String, [u8; 32]) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verkey = hex::encode(signing_key.verifying_key().to_bytes());
        (verkey, signing_key.to_bytes())
    }
}

#[async_trait]
impl CryptoProvider for Wallet {
    async fn sign(&self, signer_vk: &str, data: &[u8]) -> Result<Vec<u8>, WalletError> {
        let state = self.state.read().await;
        let secret = state
            .keys
            .get(signer_vk)
            .ok_or_else(|| WalletError::UnknownVerkey(signer_vk.to_string()))?;
        let signing_key = SigningKey::from_bytes(secret);
        Ok(signing_key.sign(data).to_bytes().to_vec())
    }

    async fn verify(
        &self,
        signer_vk: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, WalletError> {
        // Undecodable inputs are a failed verification, not a fault.
        let Ok(vk_bytes) = hex::decode(signer_vk) else {
            return Ok(false);
        };
        let Ok(vk_bytes) = <[u8; 32]>::try_from(vk_bytes) else {
            return Ok(false);
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&vk_bytes) else {
            return Ok(false);
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return Ok(false);
        };
        Ok(verifying_key.verify(data, &signature).is_ok())
    }

    async fn pack_envelope(
        &self,
        plaintext: &str,
        recipient_vks: &[String],
        sender_vk: Option<&str>,
    ) -> Result<Vec<u8>, WalletError> {
        let mut recipients = Vec::with_capacity(recipient_vks.len());
        for vk in recipient_vks {
            let key = Self::envelope_key(vk)?;
            let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
            let mut nonce = [0u8; 12];
            OsRng.fill_bytes(&mut nonce);
            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
                .map_err(|e| WalletError::Other(anyhow::anyhow!("AEAD encrypt failed: {e}")))?;
            recipients.push(WireRecipient {
                to: vk.clone(),
                nonce: URL_SAFE.encode(nonce),
                ciphertext: URL_SAFE.encode(ciphertext),
            });
        }

        let signature = match sender_vk {
            Some(vk) => Some(URL_SAFE.encode(self.sign(vk, plaintext.as_bytes()).await?)),
            None => None,
        };

        let envelope = WireEnvelope {
            protected: ENVELOPE_PROTECTED.to_string(),
            recipients,
            sender: sender_vk.map(str::to_string),
            signature,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    async fn unpack_envelope(&self, wire: &[u8]) -> Result<UnpackedEnvelope, WalletError> {
        let envelope: WireEnvelope = serde_json::from_slice(wire)
            .map_err(|e| WalletError::MalformedEnvelope(e.to_string()))?;
        if envelope.protected != ENVELOPE_PROTECTED {
            return Err(WalletError::MalformedEnvelope(format!(
                "unsupported envelope header: {}",
                envelope.protected
            )));
        }

        let state = self.state.read().await;
        let recipient = envelope
            .recipients
            .iter()
            .find(|r| state.keys.contains_key(&r.to))
            .ok_or(WalletError::NoMatchingRecipient)?;
        drop(state);

        let key = Self::envelope_key(&recipient.to)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let nonce = URL_SAFE
            .decode(&recipient.nonce)
            .map_err(|e| WalletError::MalformedEnvelope(e.to_string()))?;
        let ciphertext = URL_SAFE
            .decode(&recipient.ciphertext)
            .map_err(|e| WalletError::MalformedEnvelope(e.to_string()))?;
        if nonce.len() != 12 {
            return Err(WalletError::MalformedEnvelope("bad nonce length".into()));
        }
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| WalletError::DecryptionFailed)?;

        if let (Some(sender), Some(signature)) = (&envelope.sender, &envelope.signature) {
            let signature = URL_SAFE
                .decode(signature)
                .map_err(|e| WalletError::MalformedEnvelope(e.to_string()))?;
            if !self.verify(sender, &plaintext, &signature).await? {
                return Err(WalletError::SenderAuthenticationFailed);
            }
        }

        debug!(
            "Unpacked envelope for {} (sender: {:?})",
            recipient.to, envelope.sender
        );
        Ok(UnpackedEnvelope {
            message: String::from_utf8(plaintext)?,
            recipient_verkey: recipient.to.clone(),
            sender_verkey: envelope.sender,
        })
    }

    async fn create_key(&self) -> Result<String, WalletError> {
        let (verkey, secret) = Self::generate_keypair();
        let mut state = self.state.write().await;
        state.keys.insert(verkey.clone(), secret);
        Ok(verkey)
    }

    async fn create_local_identity(&self) -> Result<(String, String), WalletError> {
        let (verkey, secret) = Self::generate_keypair();
        let vk_bytes = hex::decode(&verkey)?;
        let did = format!("did:sov:{}", hex::encode(&vk_bytes[..16]));
        let mut state = self.state.write().await;
        state.keys.insert(verkey.clone(), secret);
        state.local_dids.insert(did.clone(), verkey.clone());
        state.key_dids.insert(verkey.clone(), did.clone());
        Ok((did, verkey))
    }
}

#[async_trait]
impl IdentityStore for Wallet {
    async fn did_for_key(&self, verkey: &str) -> Result<Option<String>, WalletError> {
        let state = self.state.read().await;
        Ok(state.key_dids.get(verkey).cloned())
    }

    async fn key_for_local_did(&self, did: &str) -> Result<String, WalletError> {
        let state = self.state.read().await;
        state
            .local_dids
            .get(did)
            .cloned()
            .ok_or_else(|| WalletError::UnknownDid(did.to_string()))
    }

    async fn pairwise_info(&self, their_did: &str) -> Result<PairwiseInfo, WalletError> {
        let state = self.state.read().await;
        state
            .pairwise
            .get(their_did)
            .cloned()
            .ok_or_else(|| WalletError::UnknownPairwise(their_did.to_string()))
    }

    async fn store_pairwise(&self, record: PairwiseInfo) -> Result<(), WalletError> {
        let mut state = self.state.write().await;
        state
            .key_dids
            .insert(record.their_vk.clone(), record.their_did.clone());
        state.pairwise.insert(record.their_did.clone(), record);
        Ok(())
    }
}
