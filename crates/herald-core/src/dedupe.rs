//! Fold a key-ordered match stream into one recipient per email address.
//!
//! Precondition: the input is grouped by [`Match::sort_key`], as produced by
//! [`WatchStore::matching`](crate::store::WatchStore::matching) and kept by
//! [`collate`]. Postcondition: exactly one [`Recipient`] per distinct
//! normalized email, carrying every watch that normalized to it.
//!
//! The representative identity of a cluster is the first one seen, upgraded
//! to a registered user if one shows up later; between two registered users
//! the lower user id wins. With the store's registered-first ordering the
//! first identity is already the right one.

use std::{
  pin::Pin,
  task::{Context, Poll, ready},
};

use futures::{Stream, StreamExt as _};

use crate::{
  collate::{Collate, collate},
  identity::Identity,
  store::{BoxMatchStream, Match, Order},
  watch::Watch,
};

/// A unique recipient of a fired event and the watches that selected them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
  pub identity: Identity,
  pub watches:  Vec<Watch>,
}

/// Deduplicate a grouped match stream.
pub fn dedupe<S, E>(matches: S) -> Dedupe<S>
where
  S: Stream<Item = Result<Match, E>> + Unpin,
{
  Dedupe { inner: matches, cluster: None, exhausted: false }
}

/// Stream returned by [`dedupe`].
pub struct Dedupe<S> {
  inner:     S,
  cluster:   Option<Cluster>,
  exhausted: bool,
}

struct Cluster {
  key:            String,
  representative: Identity,
  watches:        Vec<Watch>,
}

impl Cluster {
  fn start(key: String, m: Match) -> Self {
    Self { key, representative: m.identity, watches: vec![m.watch] }
  }

  fn absorb(&mut self, m: Match) {
    if prefer(&m.identity, &self.representative) {
      self.representative = m.identity;
    }
    self.watches.push(m.watch);
  }

  fn finish(self) -> Recipient {
    Recipient { identity: self.representative, watches: self.watches }
  }
}

/// Whether `candidate` should replace `current` as a cluster's representative.
fn prefer(candidate: &Identity, current: &Identity) -> bool {
  match (candidate, current) {
    (Identity::Registered(_), Identity::Anonymous(_)) => true,
    (Identity::Registered(a), Identity::Registered(b)) => match (a.user_id, b.user_id) {
      (Some(a), Some(b)) => a < b,
      (Some(_), None) => true,
      _ => false,
    },
    _ => false,
  }
}

impl<S, E> Stream for Dedupe<S>
where
  S: Stream<Item = Result<Match, E>> + Unpin,
{
  type Item = Result<Recipient, E>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    while !this.exhausted {
      let m = match ready!(this.inner.poll_next_unpin(cx)) {
        Some(Ok(m)) => m,
        Some(Err(e)) => return Poll::Ready(Some(Err(e))),
        None => {
          this.exhausted = true;
          break;
        }
      };
      let key = m.sort_key();
      let same = this.cluster.as_ref().is_some_and(|c| c.key == key);
      if same {
        if let Some(cluster) = this.cluster.as_mut() {
          cluster.absorb(m);
        }
        continue;
      }
      if let Some(done) = this.cluster.replace(Cluster::start(key, m)) {
        return Poll::Ready(Some(Ok(done.finish())));
      }
    }
    Poll::Ready(this.cluster.take().map(|c| Ok(c.finish())))
  }
}

/// The lazy recipient stream of a fired event.
pub type Recipients<'a, E> =
  Dedupe<Collate<BoxMatchStream<'a, E>, String, fn(&Match) -> String>>;

/// Collate per-event match streams by email, then deduplicate.
pub fn recipients<E>(streams: Vec<BoxMatchStream<'_, E>>, order: Order) -> Recipients<'_, E> {
  let key: fn(&Match) -> String = Match::sort_key;
  dedupe(collate(streams, key, order.is_descending()))
}
