use thiserror::Error;

pub(crate) type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("unable to connect to the metadata store: {0}")]
    Connection(String),

    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("watch error: {0}")]
    WatchError(String),

    #[error("unsupported operation for this backend")]
    UnsupportedOperation,

    #[error("unknown error: {0}")]
    Unknown(String),
}
