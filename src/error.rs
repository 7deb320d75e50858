use std::result;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed block data: {0}")]
    Malformed(String),

    #[error("unknown previous output {tx_hash}#{index}")]
    UnknownPreviousOutput { tx_hash: String, index: u32 },

    #[error("sync info {0} is not in syncing state")]
    SyncConflict(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("node rpc error: {0}")]
    Rpc(String),

    #[error("db error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Rpc(err.to_string())
    }
}
