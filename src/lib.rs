use transport::TransportError;
use wallet::WalletError;

pub mod agent;
pub mod basicmessage;
pub mod connection;
pub mod envelope;
pub mod handshake;
pub mod harness;
pub mod message;
pub mod router;
pub mod signature;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Message is missing the @type field")]
    MissingType,
    #[error("Wire text is not a JSON object")]
    NotAnObject,

    #[error("JSON processing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SignedFieldError {
    #[error("sig_data is too short to contain a timestamp")]
    TruncatedSigData,
    #[error("Signed payload is not valid JSON: {0}")]
    MalformedPayload(serde_json::Error),

    #[error("Failed to decode base64 field: {0}")]
    Base64DecodingError(#[from] base64::DecodeError),
    #[error("JSON processing error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error(transparent)]
    WalletError(#[from] WalletError),
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Wire bytes are neither plaintext nor a decryptable envelope")]
    MalformedWireBytes,

    #[error(transparent)]
    MessageError(#[from] MessageError),
    #[error(transparent)]
    WalletError(#[from] WalletError),
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("A module is already registered for family: {0}")]
    DuplicateFamily(String),
    #[error("A handler is already registered for message type: {0}")]
    DuplicateHandler(String),
    #[error("No route for message type: {0}")]
    UnroutableMessage(String),

    #[error(transparent)]
    ConnectionError(#[from] ConnectionError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Required field is missing: {0}")]
    MissingField(String),
    #[error("Field has unexpected value: {0}")]
    FieldMismatch(String),
    #[error("Response @id does not match the request: expected {expected}, got {got}")]
    ThreadIdMismatch { expected: String, got: String },
    #[error("Signature verification failed for field: {0}")]
    SignatureVerificationFailed(String),
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("Invite URL is missing the c_i parameter")]
    MalformedInviteUrl,
    #[error("Message delivery failed with status {0}")]
    DeliveryFailed(u16),

    #[error("Failed to parse invite URL: {0}")]
    InviteUrlParsingError(#[from] url::ParseError),
    #[error("Failed to decode invite blob: {0}")]
    Base64DecodingError(#[from] base64::DecodeError),

    #[error(transparent)]
    SignedFieldError(#[from] SignedFieldError),
    #[error(transparent)]
    MessageError(#[from] MessageError),
    #[error(transparent)]
    EnvelopeError(#[from] EnvelopeError),
    #[error(transparent)]
    WalletError(#[from] WalletError),
    #[error(transparent)]
    TransportError(#[from] TransportError),
    #[error("JSON processing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Inbound message queue is closed")]
    QueueClosed,
    #[error("Wallet is not connected")]
    WalletNotConnected,

    #[error(transparent)]
    WalletError(#[from] WalletError),
    #[error(transparent)]
    EnvelopeError(#[from] EnvelopeError),
    #[error(transparent)]
    RouteError(#[from] RouteError),
    #[error(transparent)]
    MessageError(#[from] MessageError),
    #[error(transparent)]
    TransportError(#[from] TransportError),
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Timed out after {0:?} waiting for a message")]
    Timeout(std::time::Duration),
    #[error("Expected silence but a message arrived")]
    UnexpectedMessage,
    #[error("Inbound channel closed while waiting")]
    ChannelClosed,
}
