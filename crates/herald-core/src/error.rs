//! Error types for `herald-core`.

use thiserror::Error;
use uuid::Uuid;

/// A boxed error from a pluggable backend (watch store or mailer).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// The filter name is not declared by the event type.
  #[error("event {event_type:?} does not support filter {name:?}")]
  UnsupportedFilter { event_type: String, name: String },

  /// An identity passed to `exclude` has never been persisted, so it cannot
  /// be compared against stored watches.
  #[error("cannot exclude user {0:?}: it has no persisted id")]
  InvalidExclude(String),

  /// A watcher with no email address, or a user that was never saved.
  #[error("invalid watcher: {0}")]
  InvalidWatcher(String),

  /// A configured extension point cannot be resolved.
  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("watch not found: {0}")]
  WatchNotFound(Uuid),

  /// Sending the confirmation message for a new watch failed; the watch has
  /// been removed again.
  #[error("could not send confirmation to {email}: {source}")]
  ActivationRequestFailed {
    email:  String,
    #[source]
    source: BoxError,
  },

  #[error("store error: {0}")]
  Store(#[source] BoxError),

  #[error("delivery error: {0}")]
  Delivery(#[source] BoxError),
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub fn delivery(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Delivery(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
