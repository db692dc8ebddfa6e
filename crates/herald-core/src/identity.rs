//! Identities that can own watches and receive notifications.
//!
//! A recipient is either a registered [`User`] or a bare email address wrapped
//! in an [`EmailUser`]. Both are reduced to a lower-cased email when recipients
//! are deduplicated, so one person is notified once no matter how many watches
//! they hold or under which identity.

use std::{
  fmt,
  hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The comparison form of an email address.
pub fn normalize_email(email: &str) -> String { email.to_lowercase() }

// ─── Registered users ────────────────────────────────────────────────────────

/// A registered account, as far as notifications are concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
  /// `None` until the account has been persisted.
  pub user_id:  Option<Uuid>,
  pub username: String,
  pub email:    String,
}

impl User {
  /// An account that has not been saved anywhere yet.
  pub fn unsaved(username: impl Into<String>, email: impl Into<String>) -> Self {
    Self { user_id: None, username: username.into(), email: email.into() }
  }

  pub fn is_persisted(&self) -> bool { self.user_id.is_some() }
}

// ─── Anonymous users ─────────────────────────────────────────────────────────

/// An anonymous recipient known only by email address.
///
/// Equality and hashing ignore case so that `EmailUser`s mix with registered
/// users in hashed collections keyed by address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailUser {
  email: String,
}

impl EmailUser {
  pub fn new(email: impl Into<String>) -> Self { Self { email: email.into() } }

  pub fn email(&self) -> &str { &self.email }
}

impl PartialEq for EmailUser {
  fn eq(&self, other: &Self) -> bool {
    normalize_email(&self.email) == normalize_email(&other.email)
  }
}

impl Eq for EmailUser {}

impl Hash for EmailUser {
  fn hash<H: Hasher>(&self, state: &mut H) {
    normalize_email(&self.email).hash(state);
  }
}

impl fmt::Display for EmailUser {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.email)
  }
}

// ─── Identity ────────────────────────────────────────────────────────────────

/// Who a matched watch resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
  Registered(User),
  Anonymous(EmailUser),
}

impl Identity {
  pub fn email(&self) -> &str {
    match self {
      Self::Registered(user) => &user.email,
      Self::Anonymous(anon) => anon.email(),
    }
  }

  /// The deduplication key.
  pub fn normalized_email(&self) -> String { normalize_email(self.email()) }

  pub fn is_registered(&self) -> bool { matches!(self, Self::Registered(_)) }

  pub fn user_id(&self) -> Option<Uuid> {
    match self {
      Self::Registered(user) => user.user_id,
      Self::Anonymous(_) => None,
    }
  }
}

impl From<User> for Identity {
  fn from(user: User) -> Self { Self::Registered(user) }
}

impl From<EmailUser> for Identity {
  fn from(anon: EmailUser) -> Self { Self::Anonymous(anon) }
}

// ─── Watcher ─────────────────────────────────────────────────────────────────

/// The subject of `notify`, `is_notifying` and `stop_notifying`: a registered
/// user or a bare email address.
#[derive(Debug, Clone, Copy)]
pub enum Watcher<'a> {
  User(&'a User),
  Email(&'a str),
}

impl Watcher<'_> {
  pub fn is_registered(&self) -> bool { matches!(self, Self::User(_)) }

  /// The address confirmation messages go to.
  pub fn email(&self) -> &str {
    match self {
      Self::User(user) => &user.email,
      Self::Email(email) => email,
    }
  }
}

impl<'a> From<&'a User> for Watcher<'a> {
  fn from(user: &'a User) -> Self { Self::User(user) }
}

impl<'a> From<&'a str> for Watcher<'a> {
  fn from(email: &'a str) -> Self { Self::Email(email) }
}

impl<'a> From<&'a String> for Watcher<'a> {
  fn from(email: &'a String) -> Self { Self::Email(email) }
}

impl<'a> From<&'a EmailUser> for Watcher<'a> {
  fn from(anon: &'a EmailUser) -> Self { Self::Email(anon.email()) }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use super::*;

  #[test]
  fn email_users_compare_by_address() {
    assert_ne!(EmailUser::new("frank"), EmailUser::new("george"));
    assert_eq!(EmailUser::new("frank"), EmailUser::new("frank"));
    assert_eq!(EmailUser::new("Frank@Example.com"), EmailUser::new("frank@example.com"));
  }

  #[test]
  fn email_users_hash_by_normalized_address() {
    let set: HashSet<EmailUser> = [
      EmailUser::new("frank@example.com"),
      EmailUser::new("FRANK@example.com"),
      EmailUser::new("george@example.com"),
    ]
    .into_iter()
    .collect();
    assert_eq!(set.len(), 2);
  }

  #[test]
  fn identity_normalizes_registered_and_anonymous_alike() {
    let registered = Identity::from(User::unsaved("u", "X@Y.com"));
    let anonymous = Identity::from(EmailUser::new("x@y.COM"));
    assert_eq!(registered.normalized_email(), anonymous.normalized_email());
    assert!(registered.is_registered());
    assert!(!anonymous.is_registered());
  }
}
