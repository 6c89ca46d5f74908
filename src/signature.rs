//! Detached, timestamped signatures over message sub-documents.
//!
//! `sig_data` is base64url(8-byte big-endian unix-time ++ UTF-8 JSON of the
//! payload); the signature is taken over those raw bytes, not the base64
//! text. The embedded timestamp binds a signing time into the signature but
//! is not checked for freshness here: staleness policy belongs to callers.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wallet::CryptoProvider;

use crate::SignedFieldError;

/// `@type` of a single ed25519 signature field.
pub const SIGNATURE_TYPE: &str =
    "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/signature/1.0/ed25519Sha512_single";

/// A detached signature over an arbitrary sub-payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedField {
    #[serde(rename = "@type")]
    pub field_type: String,
    pub signer: String,
    pub sig_data: String,
    pub signature: String,
}

/// Sign `payload` with the key behind `signer_vk`, binding the current
/// wall-clock time. Reads the system clock; tests must not assume a fixed
/// timestamp.
pub async fn sign_field(
    crypto: &dyn CryptoProvider,
    signer_vk: &str,
    payload: &Value,
) -> Result<SignedField, SignedFieldError> {
    let timestamp = Utc::now().timestamp() as u64;
    let mut sig_data_bytes = timestamp.to_be_bytes().to_vec();
    sig_data_bytes.extend_from_slice(serde_json::to_string(payload)?.as_bytes());

    let signature_bytes = crypto.sign(signer_vk, &sig_data_bytes).await?;

    Ok(SignedField {
        field_type: SIGNATURE_TYPE.to_string(),
        signer: signer_vk.to_string(),
        sig_data: URL_SAFE.encode(&sig_data_bytes),
        signature: URL_SAFE.encode(signature_bytes),
    })
}

/// Verify a signed field and recover its payload.
///
/// `verified == false` is a normal return value; callers decide whether to
/// reject the surrounding message. A payload that is not valid JSON is a
/// malformed-field error, distinct from a failed verification.
pub async fn verify_signed_field(
    crypto: &dyn CryptoProvider,
    field: &SignedField,
) -> Result<(Value, bool), SignedFieldError> {
    let sig_data_bytes = URL_SAFE.decode(&field.sig_data)?;
    let signature_bytes = URL_SAFE.decode(&field.signature)?;

    let verified = crypto
        .verify(&field.signer, &sig_data_bytes, &signature_bytes)
        .await?;

    if sig_data_bytes.len() < 8 {
        return Err(SignedFieldError::TruncatedSigData);
    }
    // The first 8 bytes are the signing timestamp; freshness is a caller
    // policy and is not enforced here.
    let payload = serde_json::from_slice(&sig_data_bytes[8..])
        .map_err(SignedFieldError::MalformedPayload)?;

    Ok((payload, verified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wallet::WalletDirectory;

    async fn test_wallet() -> wallet::Wallet {
        let directory = WalletDirectory::new();
        directory
            .create("sig-test", "pw")
            .await
            .expect("Failed to create wallet");
        directory
            .open("sig-test", "pw")
            .await
            .expect("Failed to open wallet")
    }

    #[tokio::test]
    async fn test_sign_verify_round_trip() {
        let wallet = test_wallet().await;
        let verkey = wallet.create_key().await.expect("Failed to create key");
        let payload = json!({"DID": "did:sov:abc", "DIDDoc": {"verkey": "k"}});

        let field = sign_field(&wallet, &verkey, &payload)
            .await
            .expect("Failed to sign");
        assert_eq!(field.field_type, SIGNATURE_TYPE);
        assert_eq!(field.signer, verkey);

        let (recovered, verified) = verify_signed_field(&wallet, &field)
            .await
            .expect("Failed to verify");
        assert!(verified);
        assert_eq!(recovered, payload);
    }

    #[tokio::test]
    async fn test_tampering_fails_verification_without_panicking() {
        let wallet = test_wallet().await;
        let verkey = wallet.create_key().await.unwrap();
        let payload = json!({"x": 1});
        let field = sign_field(&wallet, &verkey, &payload).await.unwrap();

        // Wrong signer key.
        let other_vk = wallet.create_key().await.unwrap();
        let mut wrong_signer = field.clone();
        wrong_signer.signer = other_vk;
        let (_, verified) = verify_signed_field(&wallet, &wrong_signer).await.unwrap();
        assert!(!verified);

        // Tampered sig_data (payload swapped out from under the signature).
        let mut tampered = field.clone();
        let mut sig_data = 0u64.to_be_bytes().to_vec();
        sig_data.extend_from_slice(b"{\"x\":2}");
        tampered.sig_data = URL_SAFE.encode(sig_data);
        let (payload, verified) = verify_signed_field(&wallet, &tampered).await.unwrap();
        assert!(!verified);
        assert_eq!(payload, json!({"x": 2}));

        // Tampered signature bytes.
        let mut bad_sig = field.clone();
        let mut raw = URL_SAFE.decode(&bad_sig.signature).unwrap();
        raw[0] ^= 0xff;
        bad_sig.signature = URL_SAFE.encode(raw);
        let (_, verified) = verify_signed_field(&wallet, &bad_sig).await.unwrap();
        assert!(!verified);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_distinct_from_failed_verification() {
        let wallet = test_wallet().await;
        let verkey = wallet.create_key().await.unwrap();
        let field = sign_field(&wallet, &verkey, &json!({"ok": true}))
            .await
            .unwrap();

        let mut malformed = field.clone();
        let mut sig_data = 0u64.to_be_bytes().to_vec();
        sig_data.extend_from_slice(b"not json");
        malformed.sig_data = URL_SAFE.encode(sig_data);
        let result = verify_signed_field(&wallet, &malformed).await;
        assert!(matches!(result, Err(SignedFieldError::MalformedPayload(_))));

        let mut truncated = field;
        truncated.sig_data = URL_SAFE.encode(b"abc");
        let result = verify_signed_field(&wallet, &truncated).await;
        assert!(matches!(result, Err(SignedFieldError::TruncatedSigData)));
    }
}
