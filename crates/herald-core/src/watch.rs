//! Watch records: a subscription of one owner to one event type.
//!
//! A watch starts unconfirmed (`is_active == false`) when an anonymous address
//! subscribes and confirmation is required, becomes active once confirmed, and
//! is deleted by unsubscribing or when the content it points at goes away.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, identity::normalize_email, store::WatchStore};

// ─── Content references ──────────────────────────────────────────────────────

/// A pointer to one instance of some application model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
  pub content_type: String,
  pub object_id:    u64,
}

impl ContentRef {
  pub fn new(content_type: impl Into<String>, object_id: u64) -> Self {
    Self { content_type: content_type.into(), object_id }
  }
}

// ─── Owner ───────────────────────────────────────────────────────────────────

/// Exactly one of a registered user or a raw email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Owner {
  User(Uuid),
  Email(String),
}

impl Owner {
  /// Two owners denote the same subscriber; emails compare case-insensitively.
  pub fn same_as(&self, other: &Owner) -> bool {
    match (self, other) {
      (Self::User(a), Self::User(b)) => a == b,
      (Self::Email(a), Self::Email(b)) => normalize_email(a) == normalize_email(b),
      _ => false,
    }
  }
}

// ─── Watch ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watch {
  pub watch_id:   Uuid,
  pub event_type: String,
  pub content:    Option<ContentRef>,
  pub owner:      Owner,
  /// Authorizes unsubscribe links; never changes.
  pub secret:     String,
  pub is_active:  bool,
  pub created_at: DateTime<Utc>,
  /// Filter name to stored (hashed) value.
  pub filters:    BTreeMap<String, u32>,
}

impl Watch {
  /// Confirm this watch so that it starts matching.
  pub async fn activate<S: WatchStore>(&mut self, store: &S) -> Result<()> {
    *self = activate(store, self.watch_id).await?;
    Ok(())
  }

  /// The anonymous address, if the watch is not owned by a user.
  pub fn email(&self) -> Option<&str> {
    match &self.owner {
      Owner::Email(email) => Some(email),
      Owner::User(_) => None,
    }
  }
}

/// Confirm the stored watch `watch_id` and return its new state.
pub async fn activate<S: WatchStore>(store: &S, watch_id: Uuid) -> Result<Watch> {
  let watch = store
    .activate_watch(watch_id)
    .await
    .map_err(Error::store)?
    .ok_or(Error::WatchNotFound(watch_id))?;
  tracing::debug!(watch_id = %watch.watch_id, "watch activated");
  Ok(watch)
}

// ─── Lookup key ──────────────────────────────────────────────────────────────

/// Everything that identifies a watch apart from its id: used for exact
/// lookups by `notify`, `is_notifying` and `stop_notifying`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchKey {
  pub event_type: String,
  pub content:    Option<ContentRef>,
  pub owner:      Owner,
  pub filters:    BTreeMap<String, u32>,
}

impl WatchKey {
  /// Whether `watch` has exactly this key: same type, content, owner and the
  /// same filter set (not a superset or subset).
  pub fn matches(&self, watch: &Watch) -> bool {
    watch.event_type == self.event_type
      && watch.content == self.content
      && watch.owner.same_as(&self.owner)
      && watch.filters == self.filters
  }
}

/// Input to [`WatchStore::find_or_create_watch`](crate::store::WatchStore).
#[derive(Debug, Clone)]
pub struct NewWatch {
  pub key:       WatchKey,
  pub secret:    String,
  pub is_active: bool,
}

// ─── Secrets ─────────────────────────────────────────────────────────────────

/// Letters that are hard to confuse with each other or with digits.
const SECRET_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyzABCDEFGHJKLMNPQRTUVWXYZ";

pub const SECRET_LEN: usize = 10;

/// A fresh unsubscribe secret.
pub fn generate_secret() -> String {
  (0..SECRET_LEN)
    .map(|_| SECRET_ALPHABET[uniform_index(SECRET_ALPHABET.len(), || OsRng.next_u32())] as char)
    .collect()
}

/// A uniformly distributed index below `len`. Draws from `next` that fall in
/// the incomplete top block of `u32` are rejected.
fn uniform_index(len: usize, mut next: impl FnMut() -> u32) -> usize {
  let len = len as u32;
  let zone = u32::MAX - u32::MAX % len;
  loop {
    let draw = next();
    if draw < zone {
      return (draw % len) as usize;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn watch(owner: Owner, filters: &[(&str, u32)]) -> Watch {
    Watch {
      watch_id: Uuid::new_v4(),
      event_type: "ping".into(),
      content: None,
      owner,
      secret: generate_secret(),
      is_active: true,
      created_at: Utc::now(),
      filters: filters.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect(),
    }
  }

  #[test]
  fn secrets_use_the_unambiguous_alphabet() {
    let secret = generate_secret();
    assert_eq!(secret.len(), SECRET_LEN);
    assert!(secret.bytes().all(|b| SECRET_ALPHABET.contains(&b)));
    assert!(!secret.contains(['i', 'l', 'o', 'I', 'O', 'S']));
  }

  #[test]
  fn top_draws_are_rejected() {
    let len = SECRET_ALPHABET.len();
    let zone = u32::MAX - u32::MAX % len as u32;
    let mut draws = [u32::MAX, zone, zone - 1].into_iter();
    let index = uniform_index(len, || draws.next().unwrap());
    assert_eq!(index, (zone - 1) as usize % len);
    assert_eq!(draws.next(), None);
  }

  #[test]
  fn every_letter_is_reachable() {
    let len = SECRET_ALPHABET.len();
    let mut draw = 0u32;
    let seen: std::collections::BTreeSet<usize> = (0..len)
      .map(|_| {
        let index = uniform_index(len, || draw);
        draw += 1;
        index
      })
      .collect();
    assert_eq!(seen.len(), len);
  }

  #[test]
  fn key_requires_exact_filter_set() {
    let w = watch(Owner::Email("hi@there.com".into()), &[("color", 3), ("flavor", 4)]);
    let mut key = WatchKey {
      event_type: "ping".into(),
      content:    None,
      owner:      Owner::Email("HI@there.com".into()),
      filters:    [("color".to_owned(), 3)].into(),
    };
    assert!(!key.matches(&w));
    key.filters.insert("flavor".into(), 4);
    assert!(key.matches(&w));
  }

  #[test]
  fn users_and_emails_are_different_owners() {
    let id = Uuid::new_v4();
    assert!(Owner::User(id).same_as(&Owner::User(id)));
    assert!(!Owner::User(id).same_as(&Owner::Email("a@b.com".into())));
  }
}
