pub mod flat;

use thiserror::Error;

pub use flat::{FlatStore, LoadStats};

#[derive(Debug, Error)]
pub enum KvsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KvsError>;
