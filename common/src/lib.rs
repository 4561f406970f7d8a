use smol_str::SmolStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Buffer is too small: {0} bytes")]
    BufferTooSmall(usize),
    #[error("must be superuser to use pg_check functions")]
    InsufficientPrivilege,
    #[error("object \"{0}\" is not {1}")]
    WrongObjectType(SmolStr, &'static str),
    #[error("invalid {0} block number: {1}")]
    InvalidBlockNumber(&'static str, i64),
    #[error("cross-check with indexes not possible with explicit block range")]
    RangeWithIndexes,
    #[error("{0} not found: {1}")]
    NotFound(SmolStr, SmolStr),
    #[error("bitmap dimensions differ: {0} vs {1} pages")]
    BitmapMismatch(u32, u32),
    #[error("Unknown bitmap format: {0}")]
    UnknownBitmapFormat(SmolStr),
    #[error("Failed to {0}: {1}")]
    FailedTo(SmolStr, SmolStr),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
