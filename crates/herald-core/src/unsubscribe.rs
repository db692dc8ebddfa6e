//! The unsubscribe boundary behind emailed links.
//!
//! A link carries a watch id and its secret. Reading the link only checks the
//! secret; confirming it deletes the watch. A wrong secret and a missing watch
//! look the same to the caller, so links cannot be used to discover watches.

use uuid::Uuid;

use crate::{Error, Result, store::WatchStore, watch::Watch};

/// Outcome of an unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsubscribe {
  Removed,
  NotFound,
}

/// The watch `watch_id`, if it exists and `secret` matches.
pub async fn check<S: WatchStore>(store: &S, watch_id: Uuid, secret: &str) -> Result<Option<Watch>> {
  let watch = store.get_watch(watch_id).await.map_err(Error::store)?;
  Ok(watch.filter(|w| w.secret == secret))
}

/// Delete the watch `watch_id` if `secret` matches.
pub async fn confirm<S: WatchStore>(store: &S, watch_id: Uuid, secret: &str) -> Result<Unsubscribe> {
  if check(store, watch_id, secret).await?.is_none() {
    return Ok(Unsubscribe::NotFound);
  }
  let removed = store.delete_watch(watch_id).await.map_err(Error::store)?;
  tracing::debug!(%watch_id, removed, "unsubscribed");
  Ok(if removed { Unsubscribe::Removed } else { Unsubscribe::NotFound })
}
