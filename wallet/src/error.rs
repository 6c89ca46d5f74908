#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Wallet already exists: {0}")]
    AlreadyExists(String),
    #[error("Wallet not found: {0}")]
    NotFound(String),
    #[error("Bad passphrase for wallet: {0}")]
    BadPassphrase(String),

    #[error("Verkey is not in the wallet: {0}")]
    UnknownVerkey(String),
    #[error("DID is not in the wallet: {0}")]
    UnknownDid(String),
    #[error("No pairwise record for DID: {0}")]
    UnknownPairwise(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("Envelope is not addressed to any key in this wallet")]
    NoMatchingRecipient,
    #[error("Failed to decrypt envelope payload")]
    DecryptionFailed,
    #[error("Sender signature did not verify")]
    SenderAuthenticationFailed,

    #[error("Failed to decode verkey: {0}")]
    VerkeyDecodingError(#[from] hex::FromHexError),
    #[error("Failed to derive envelope key: {0}")]
    KeyDerivationError(#[from] hkdf::InvalidLength),
    #[error("UTF-8 parsing error: {0}")]
    Utf8ParsingError(#[from] std::string::FromUtf8Error),
    #[error("JSON processing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("An unknown error occurred: {0}")]
    Other(anyhow::Error),
}
