use thiserror::Error;

#[derive(Error, Debug)]
pub enum PacerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sync byte missing at offset {offset} (found 0x{found:02X})")]
    Sync { offset: u64, found: u8 },

    #[error("timestamp track exhausted at chunk {chunk}")]
    TimestampTrackExhausted { chunk: u64 },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, PacerError>;
