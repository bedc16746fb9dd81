use thiserror::Error;

#[derive(Error, Debug)]
pub enum PalaverError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid IV encoding")]
    InvalidIv,
}

/// Errors raised while validating a frame at the network boundary.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Frame exceeds the maximum accepted size")]
    Oversized,

    #[error("Message carries neither an id nor a usable content/from/time triple")]
    Unidentifiable,

    #[error("Unparseable timestamp: {0}")]
    BadTimestamp(String),
}
