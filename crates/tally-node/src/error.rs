use tally_core::CoreError;
use tally_network::NetworkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("no validator available to produce a block")]
    NoValidatorAvailable,

    #[error("pending pool is full ({0} transactions)")]
    PoolFull(usize),

    #[error("sender {0:?} is reserved for the genesis mint")]
    ReservedSender(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl From<sled::Error> for NodeError {
    fn from(e: sled::Error) -> Self {
        NodeError::Storage(e.to_string())
    }
}
