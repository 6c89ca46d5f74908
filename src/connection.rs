//! Connection handshake message shapes: Invite, Request, Response.
//!
//! Invites travel out-of-band as a URL with a single `c_i` query parameter
//! carrying base64url(JSON). Requests carry the requester's DID and DIDDoc
//! in clear. Responses carry the responder's connection block only as a
//! signed field until the invitee verifies it and promotes the plaintext.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;
use wallet::CryptoProvider;

use crate::message::Message;
use crate::signature::{sign_field, verify_signed_field, SignedField};
use crate::ConnectionError;

pub const FAMILY: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/connections/1.0/";
pub const INVITE: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/connections/1.0/invitation";
pub const REQUEST: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/connections/1.0/request";
pub const RESPONSE: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/connections/1.0/response";

pub const CONNECTION: &str = "connection";
pub const CONNECTION_SIG: &str = "connection~sig";

/// A small document binding a DID to its current key and service endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidDoc {
    #[serde(rename = "DID")]
    pub did: String,
    pub verkey: String,
    #[serde(rename = "serviceEndpoint")]
    pub endpoint: String,
}

/// The `connection` block of Requests and verified Responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionBlock {
    #[serde(rename = "DID")]
    pub did: String,
    #[serde(rename = "DIDDoc")]
    pub did_doc: DidDoc,
}

impl ConnectionBlock {
    fn new(did: &str, verkey: &str, endpoint: &str) -> Self {
        Self {
            did: did.to_string(),
            did_doc: DidDoc {
                did: did.to_string(),
                verkey: verkey.to_string(),
                endpoint: endpoint.to_string(),
            },
        }
    }
}

fn require_str(msg: &Message, key: &str) -> Result<String, ConnectionError> {
    msg.str_field(key)
        .map(str::to_string)
        .ok_or_else(|| ConnectionError::MissingField(key.to_string()))
}

/// Validate and parse a `connection` value into its block form.
fn parse_connection_block(value: &Value) -> Result<ConnectionBlock, ConnectionError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ConnectionError::FieldMismatch(CONNECTION.to_string()))?;
    if !obj.contains_key("DID") {
        return Err(ConnectionError::MissingField("connection.DID".to_string()));
    }
    if !obj.contains_key("DIDDoc") {
        return Err(ConnectionError::MissingField("connection.DIDDoc".to_string()));
    }
    let block: ConnectionBlock = serde_json::from_value(value.clone())
        .map_err(|_| ConnectionError::FieldMismatch(CONNECTION.to_string()))?;
    if block.did_doc.did != block.did {
        return Err(ConnectionError::FieldMismatch(
            "connection.DIDDoc.DID".to_string(),
        ));
    }
    if block.did_doc.verkey.is_empty() {
        return Err(ConnectionError::MissingField(
            "connection.DIDDoc.verkey".to_string(),
        ));
    }
    if block.did_doc.endpoint.is_empty() {
        return Err(ConnectionError::MissingField(
            "connection.DIDDoc.serviceEndpoint".to_string(),
        ));
    }
    Ok(block)
}

pub struct Invite;

impl Invite {
    /// Build an invite around a fresh single-use connection key.
    pub fn build(label: &str, connection_key: &str, endpoint: &str) -> Message {
        Message::try_from(json!({
            "@type": INVITE,
            "label": label,
            "recipientKeys": [connection_key],
            "serviceEndpoint": endpoint,
            "@id": Uuid::new_v4().to_string(),
        }))
        .expect("invite shape always has @type")
    }

    /// Encode an invite for out-of-band delivery: the service endpoint URL
    /// with the whole message in a `c_i` query parameter.
    pub fn to_url(invite: &Message) -> Result<String, ConnectionError> {
        let endpoint = require_str(invite, "serviceEndpoint")?;
        let mut url = Url::parse(&endpoint)?;
        let blob = URL_SAFE.encode(invite.serialize()?);
        url.query_pairs_mut().append_pair("c_i", &blob);
        Ok(url.to_string())
    }

    /// Reverse of [`Invite::to_url`]; accepts `c_i` anywhere in the query.
    pub fn parse(invite_url: &str) -> Result<Message, ConnectionError> {
        let url = Url::parse(invite_url)?;
        let blob = url
            .query_pairs()
            .find(|(key, _)| key == "c_i")
            .map(|(_, value)| value.into_owned())
            .ok_or(ConnectionError::MalformedInviteUrl)?;
        let decoded = URL_SAFE.decode(blob.as_bytes())?;
        let text = String::from_utf8(decoded)
            .map_err(|_| ConnectionError::MalformedInviteUrl)?;
        let invite = Message::deserialize(&text)?;
        Invite::validate(&invite)?;
        Ok(invite)
    }

    pub fn validate(invite: &Message) -> Result<(), ConnectionError> {
        if invite.msg_type() != INVITE {
            return Err(ConnectionError::FieldMismatch("@type".to_string()));
        }
        require_str(invite, "label")?;
        require_str(invite, "serviceEndpoint")?;
        Invite::recipient_key(invite)?;
        Ok(())
    }

    /// The single-use key the request must be encrypted to.
    pub fn recipient_key(invite: &Message) -> Result<String, ConnectionError> {
        invite
            .get("recipientKeys")
            .and_then(Value::as_array)
            .and_then(|keys| keys.first())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ConnectionError::MissingField("recipientKeys".to_string()))
    }
}

pub struct Request;

impl Request {
    pub fn build(label: &str, my_did: &str, my_vk: &str, endpoint: &str) -> Message {
        Message::try_from(json!({
            "@type": REQUEST,
            "@id": Uuid::new_v4().to_string(),
            "label": label,
            CONNECTION: ConnectionBlock::new(my_did, my_vk, endpoint),
        }))
        .expect("request shape always has @type")
    }

    pub fn validate(request: &Message) -> Result<(), ConnectionError> {
        if request.msg_type() != REQUEST {
            return Err(ConnectionError::FieldMismatch("@type".to_string()));
        }
        require_str(request, "label")?;
        let connection = request
            .get(CONNECTION)
            .ok_or_else(|| ConnectionError::MissingField(CONNECTION.to_string()))?;
        parse_connection_block(connection)?;
        Ok(())
    }

    /// Extract `(their_did, their_vk, their_endpoint)` from a valid request.
    pub fn parse(request: &Message) -> Result<(String, String, String), ConnectionError> {
        let connection = request
            .get(CONNECTION)
            .ok_or_else(|| ConnectionError::MissingField(CONNECTION.to_string()))?;
        let block = parse_connection_block(connection)?;
        Ok((block.did, block.did_doc.verkey, block.did_doc.endpoint))
    }
}

pub struct Response;

impl Response {
    /// Build a response continuing the request's thread. The `connection`
    /// field is still in clear; [`Response::sign_connection`] seals it.
    pub fn build(request_id: &str, my_did: &str, my_vk: &str, endpoint: &str) -> Message {
        Message::try_from(json!({
            "@type": RESPONSE,
            "@id": request_id,
            CONNECTION: ConnectionBlock::new(my_did, my_vk, endpoint),
        }))
        .expect("response shape always has @type")
    }

    /// Replace the cleartext `connection` field with a signed field; only
    /// `connection~sig` goes over the wire.
    pub async fn sign_connection(
        response: &mut Message,
        crypto: &dyn CryptoProvider,
        signer_vk: &str,
    ) -> Result<(), ConnectionError> {
        let connection = response
            .remove(CONNECTION)
            .ok_or_else(|| ConnectionError::MissingField(CONNECTION.to_string()))?;
        let signed = sign_field(crypto, signer_vk, &connection).await?;
        response.insert(CONNECTION_SIG, serde_json::to_value(signed)?);
        Ok(())
    }

    /// Structural checks that must pass before any signature is verified.
    pub fn validate_pre_sig(response: &Message) -> Result<(), ConnectionError> {
        if response.msg_type() != RESPONSE {
            return Err(ConnectionError::FieldMismatch("@type".to_string()));
        }
        if response.id().is_none() {
            return Err(ConnectionError::MissingField("@id".to_string()));
        }
        match response.get(CONNECTION_SIG) {
            Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(ConnectionError::FieldMismatch(CONNECTION_SIG.to_string())),
            None => Err(ConnectionError::MissingField(CONNECTION_SIG.to_string())),
        }
    }

    /// Verify `connection~sig` and promote the verified payload to a plain
    /// `connection` field. A failed signature is an error here, never a
    /// silent success.
    pub async fn verify_connection(
        response: &mut Message,
        crypto: &dyn CryptoProvider,
    ) -> Result<(), ConnectionError> {
        let signed_value = response
            .get(CONNECTION_SIG)
            .cloned()
            .ok_or_else(|| ConnectionError::MissingField(CONNECTION_SIG.to_string()))?;
        let signed: SignedField = serde_json::from_value(signed_value)?;
        let (payload, verified) = verify_signed_field(crypto, &signed).await?;
        if !verified {
            return Err(ConnectionError::SignatureVerificationFailed(
                CONNECTION_SIG.to_string(),
            ));
        }
        response.insert(CONNECTION, payload);
        Ok(())
    }

    /// Full validation against the reconstructed plaintext.
    pub fn validate(response: &Message, request_id: &str) -> Result<(), ConnectionError> {
        let id = response
            .id()
            .ok_or_else(|| ConnectionError::MissingField("@id".to_string()))?;
        if id != request_id {
            return Err(ConnectionError::ThreadIdMismatch {
                expected: request_id.to_string(),
                got: id.to_string(),
            });
        }
        let connection = response
            .get(CONNECTION)
            .ok_or_else(|| ConnectionError::MissingField(CONNECTION.to_string()))?;
        parse_connection_block(connection)?;
        Ok(())
    }

    /// Extract `(their_did, their_vk, their_endpoint)` from a verified
    /// response.
    pub fn parse(response: &Message) -> Result<(String, String, String), ConnectionError> {
        let connection = response
            .get(CONNECTION)
            .ok_or_else(|| ConnectionError::MissingField(CONNECTION.to_string()))?;
        let block = parse_connection_block(connection)?;
        Ok((block.did, block.did_doc.verkey, block.did_doc.endpoint))
    }
}
