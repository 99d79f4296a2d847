use thiserror::Error;

use crate::store::ItemId;

/// Errors raised by item and metadata stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// The identifier no longer resolves to an item
    #[error("item not found: {0}")]
    NotFound(ItemId),

    /// Underlying filesystem or media-index failure
    #[error("I/O error for {id}: {source}")]
    Io {
        id: ItemId,
        #[source]
        source: std::io::Error,
    },

    /// The store cannot perform this operation for the item
    #[error("unsupported operation {operation} for {id}")]
    Unsupported { id: ItemId, operation: &'static str },

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn io(id: &ItemId, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(id.clone())
        } else {
            StoreError::Io {
                id: id.clone(),
                source,
            }
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised while running a compression attempt
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("compressor failed for {id}: {reason}")]
    Compressor { id: ItemId, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("worker task failed: {0}")]
    Join(String),
}
