//! Secure envelope packing and unpacking.
//!
//! Unpacking tries a plaintext parse first (local/administrative and
//! pre-encryption testing traffic), then falls back to authenticated
//! decryption through the crypto provider. Packing is the reverse;
//! whether the envelope authenticates the sender is the caller's choice.

use log::debug;
use wallet::{CryptoProvider, IdentityStore};

use crate::message::{Message, MessageContext};
use crate::EnvelopeError;

/// Unpack inbound wire bytes into a message.
///
/// A plaintext message carries no context; a decrypted one always carries
/// context with at least the recipient verkey. Both paths failing yields
/// [`EnvelopeError::MalformedWireBytes`]; the caller logs and drops.
pub async fn unpack(
    crypto: &dyn CryptoProvider,
    identities: &dyn IdentityStore,
    wire: &[u8],
) -> Result<Message, EnvelopeError> {
    if let Ok(text) = std::str::from_utf8(wire) {
        if let Ok(msg) = Message::deserialize(text) {
            return Ok(msg);
        }
    }
    debug!("Wire bytes are not plaintext, attempting to unpack an envelope");

    let unpacked = match crypto.unpack_envelope(wire).await {
        Ok(unpacked) => unpacked,
        Err(e) => {
            debug!("Envelope unpack failed: {e}");
            return Err(EnvelopeError::MalformedWireBytes);
        }
    };
    let mut msg = match Message::deserialize(&unpacked.message) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Decrypted payload is not a message: {e}");
            return Err(EnvelopeError::MalformedWireBytes);
        }
    };

    let from_did = match &unpacked.sender_verkey {
        Some(vk) => identities.did_for_key(vk).await?,
        None => None,
    };
    // May legitimately be unknown, e.g. a single-use invitation key.
    let to_did = identities.did_for_key(&unpacked.recipient_verkey).await?;

    msg.context = Some(MessageContext {
        from_did,
        to_did,
        from_key: unpacked.sender_verkey,
        to_key: unpacked.recipient_verkey,
    });
    Ok(msg)
}

/// Pack a message for `recipient_vks`. Omitting `sender_vk` produces an
/// anonymous envelope; providing it, a sender-authenticated one.
pub async fn pack(
    crypto: &dyn CryptoProvider,
    msg: &Message,
    recipient_vks: &[String],
    sender_vk: Option<&str>,
) -> Result<Vec<u8>, EnvelopeError> {
    let plaintext = msg.serialize()?;
    Ok(crypto
        .pack_envelope(&plaintext, recipient_vks, sender_vk)
        .await?)
}
