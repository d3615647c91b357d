use thiserror::Error;

pub type LockoreResult<T> = Result<T, LockoreError>;

#[derive(Debug, Error)]
pub enum LockoreError {
    /// The vault has no key (not unlocked, or closed).
    #[error("storage is locked")]
    Locked,

    /// The record is a head only; its field body was never loaded.
    #[error("record has no body")]
    NoBody,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("storage is already locked with a password")]
    AlreadyLocked,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported {what}: {value}")]
    UnsupportedFormat { what: String, value: String },

    /// Wrong password. The message is fixed so it cannot act as an oracle.
    #[error("signature verification failed")]
    BadSignature,

    #[error("storage has no password (public store)")]
    PublicStore,

    #[error("truncated input")]
    TruncatedInput,

    #[error("reserved field type")]
    Reserved,

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("short buffer: {0}")]
    ShortBuffer(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("slot store error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LockoreError {
    pub fn unsupported(what: impl Into<String>, value: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            what: what.into(),
            value: value.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// True for errors caused by corrupt or adversarial bytes.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::TruncatedInput | Self::Reserved | Self::Malformed(_) | Self::UnsupportedFormat { .. }
        )
    }
}
