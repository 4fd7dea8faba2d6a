use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Encode Error - {0}")]
    Encode(String),

    // log file could not be opened or written, the buffer is kept for the next flush
    #[error("Persistence Error - {0}")]
    Persistence(String),

    #[error("Sink is shutting down")]
    ShuttingDown,

    #[error("FlushLoop Error - {0}")]
    FlushLoop(String),

    #[error("Server Error - {0}")]
    Server(String),
}
