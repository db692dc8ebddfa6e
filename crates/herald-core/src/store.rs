//! The `WatchStore` trait and its query types.
//!
//! The trait is implemented by storage backends (e.g. `herald-store-sqlite`).
//! Events, the deduplicator and the unsubscribe boundary depend only on this
//! abstraction.
//!
//! # Ordering contract
//!
//! [`WatchStore::matching`] must yield rows ordered by the normalized
//! (lower-cased) effective email, ascending or descending per
//! [`MatchQuery::order`]. Within one email, rows owned by registered users come
//! before anonymous rows, then by user id, then by watch id. The collator keeps
//! this order across merged streams and the deduplicator relies on it to build
//! one cluster per email.

use std::{collections::BTreeMap, future::Future, pin::Pin};

use futures::Stream;
use uuid::Uuid;

use crate::{
  identity::{Identity, User},
  watch::{ContentRef, NewWatch, Watch, WatchKey},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Sort direction of a match stream, by normalized email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
  #[default]
  Ascending,
  Descending,
}

impl Order {
  pub fn is_descending(self) -> bool { matches!(self, Self::Descending) }
}

/// Parameters for [`WatchStore::matching`]. Filter values are already hashed
/// and filter names already validated.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
  pub event_type:     String,
  /// When set, only watches on exactly this content match.
  pub content:        Option<ContentRef>,
  /// Every entry must be present on the watch with an equal value.
  pub filters:        BTreeMap<String, u32>,
  /// Watches owned by these users never match.
  pub exclude_users:  Vec<Uuid>,
  /// Anonymous watches on these (normalized) addresses never match.
  pub exclude_emails: Vec<String>,
  pub order:          Order,
}

/// One matched watch and the identity it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
  pub identity: Identity,
  pub watch:    Watch,
}

impl Match {
  /// The merge key shared by the collator and the deduplicator.
  pub fn sort_key(&self) -> String { self.identity.normalized_email() }
}

/// A boxed match stream borrowed from its store.
pub type BoxMatchStream<'a, E> = Pin<Box<dyn Stream<Item = Result<Match, E>> + Send + 'a>>;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a watch store backend.
///
/// All methods return `Send` futures so the trait can be used from
/// multi-threaded async runtimes.
pub trait WatchStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Return the oldest watch matching `input.key` exactly, or create one.
  /// The lookup and the insert happen atomically. The flag is `true` when the
  /// watch was created by this call.
  fn find_or_create_watch(
    &self,
    input: NewWatch,
  ) -> impl Future<Output = Result<(Watch, bool), Self::Error>> + Send + '_;

  /// Retrieve a watch by id. Returns `None` if not found.
  fn get_watch(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Watch>, Self::Error>> + Send + '_;

  /// All watches matching `key` exactly, active or not, oldest first.
  fn find_exact<'a>(
    &'a self,
    key: &'a WatchKey,
  ) -> impl Future<Output = Result<Vec<Watch>, Self::Error>> + Send + 'a;

  /// Mark a watch active. Returns `None` if it does not exist.
  fn activate_watch(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Watch>, Self::Error>> + Send + '_;

  /// Delete one watch and its filters. Returns whether a row was removed.
  fn delete_watch(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Delete every watch matching `key` exactly; returns how many.
  fn delete_exact<'a>(
    &'a self,
    key: &'a WatchKey,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Active watches matching `query`, ordered as described in the module
  /// documentation. One row per watch.
  ///
  /// The stream is lazy: nothing is read before the first poll, and the
  /// backend fetches a bounded batch of rows at a time.
  fn matching(
    &self,
    query: MatchQuery,
  ) -> impl Stream<Item = Result<Match, Self::Error>> + Send + '_;

  /// Cascade: delete every watch pointing at `content`.
  fn delete_for_content<'a>(
    &'a self,
    content: &'a ContentRef,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Reassign anonymous watches on `user.email` (case-insensitive) to `user`.
  fn claim_watches<'a>(
    &'a self,
    user: &'a User,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;
}
