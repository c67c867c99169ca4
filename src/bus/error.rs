use std::net::SocketAddr;

/// Bus transport errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to bind bus hub on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("bus hub at {addr} did not answer within {waited_ms} ms")]
    Unreachable { addr: SocketAddr, waited_ms: u128 },
    #[error("invalid bus address `{0}`")]
    Address(String),
    #[error("bus i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("message is {size} bytes, over the {max} byte bus limit")]
    TooLarge { size: usize, max: usize },
    #[error("failed to encode bus packet: {0}")]
    Encode(String),
    #[error("bad bus payload: {0}")]
    Payload(#[from] serde_json::Error),
}
