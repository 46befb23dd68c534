use thiserror::Error;

use crate::core::ports::EventStoreError;

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error(transparent)]
    Store(#[from] EventStoreError),
}
