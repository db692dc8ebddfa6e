//! Error type for `herald-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  /// A stored column could not be turned back into a domain value.
  #[error("decode error: {0}")]
  Decode(String),

  /// Users must be saved before they can own or claim watches.
  #[error("user {0:?} has no persisted id")]
  UnsavedUser(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
