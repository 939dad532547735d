use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A position or span violates `start >= 1 && width >= 1`, or a split point falls outside
    /// the span it is meant to divide.
    #[error("malformed span: {0}")]
    MalformedSpan(String),
    #[error("index out of range: position {position} in stream of {count} characters")]
    IndexOutOfRange { position: u64, count: u64 },
    #[error("unsupported split: {0}")]
    UnsupportedSplit(String),
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),
    #[error("chain corrupt: {0}")]
    ChainCorrupt(String),
    #[error("content store i/o: {0}")]
    ContentStoreIo(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}
