use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid line: {0}")]
    InvalidLine(String),

    #[error("Out of order event at {timestamp:.3}s, window floor is {floor:.3}s")]
    OutOfOrderEvent { timestamp: f64, floor: f64 },

    /// Never surfaced to callers, the state machine restarts the track instead.
    #[error("Unknown track: {0}")]
    UnknownTrack(u32),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
