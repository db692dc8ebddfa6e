//! Encoding and decoding helpers between Herald domain types and the column
//! representations stored in SQLite.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings, filter
//! values and object ids plain integers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use herald_core::{
  identity::{EmailUser, Identity, User},
  store::Match,
  watch::{ContentRef, Owner, Watch},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(e.to_string()))
}

// ─── Integers ─────────────────────────────────────────────────────────────────

pub fn encode_object_id(id: u64) -> Result<i64> {
  i64::try_from(id).map_err(|_| Error::Decode(format!("object id {id} exceeds i64")))
}

pub fn decode_object_id(raw: i64) -> Result<u64> {
  u64::try_from(raw).map_err(|_| Error::Decode(format!("negative object id {raw}")))
}

pub fn decode_filter_value(raw: i64) -> Result<u32> {
  u32::try_from(raw).map_err(|_| Error::Decode(format!("filter value {raw} out of range")))
}

// ─── Owner / content ──────────────────────────────────────────────────────────

/// `(user_id, email, email_key)` columns for an owner.
pub fn encode_owner(owner: &Owner) -> (Option<String>, Option<String>, Option<String>) {
  match owner {
    Owner::User(id) => (Some(encode_uuid(*id)), None, None),
    Owner::Email(email) => (
      None,
      Some(email.clone()),
      Some(herald_core::identity::normalize_email(email)),
    ),
  }
}

/// `(content_type, object_id)` columns for an optional content reference.
pub fn encode_content(content: Option<&ContentRef>) -> Result<(Option<String>, Option<i64>)> {
  match content {
    Some(c) => Ok((Some(c.content_type.clone()), Some(encode_object_id(c.object_id)?))),
    None => Ok((None, None)),
  }
}

// ─── Row types ────────────────────────────────────────────────────────────────

/// Column list matching [`RawWatch`], for `watches w LEFT JOIN users u`.
pub const WATCH_COLUMNS: &str = "
  w.watch_id, w.event_type, w.content_type, w.object_id, w.user_id, w.email,
  w.secret, w.is_active, w.created_at, u.username, u.email";

/// Raw values read from a `watches` row joined with its owning user.
pub struct RawWatch {
  pub watch_id:     String,
  pub event_type:   String,
  pub content_type: Option<String>,
  pub object_id:    Option<i64>,
  pub user_id:      Option<String>,
  pub email:        Option<String>,
  pub secret:       String,
  pub is_active:    bool,
  pub created_at:   String,
  // users join
  pub username:     Option<String>,
  pub user_email:   Option<String>,
}

impl RawWatch {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      watch_id:     row.get(0)?,
      event_type:   row.get(1)?,
      content_type: row.get(2)?,
      object_id:    row.get(3)?,
      user_id:      row.get(4)?,
      email:        row.get(5)?,
      secret:       row.get(6)?,
      is_active:    row.get(7)?,
      created_at:   row.get(8)?,
      username:     row.get(9)?,
      user_email:   row.get(10)?,
    })
  }

  /// Decode into a [`Watch`] with the given filter rows.
  pub fn into_watch(self, filters: Vec<(String, i64)>) -> Result<Watch> {
    self.into_match(filters).map(|m| m.watch)
  }

  /// Decode into a [`Match`]: the watch plus the identity it resolves to.
  pub fn into_match(self, filters: Vec<(String, i64)>) -> Result<Match> {
    let content = match (self.content_type, self.object_id) {
      (Some(content_type), Some(object_id)) => Some(ContentRef {
        content_type,
        object_id: decode_object_id(object_id)?,
      }),
      (None, None) => None,
      _ => return Err(Error::Decode(format!("half-set content on watch {}", self.watch_id))),
    };

    let (owner, identity) = match (self.user_id, self.email) {
      (Some(user_id), None) => {
        let id = decode_uuid(&user_id)?;
        let user = User {
          user_id:  Some(id),
          username: self.username.unwrap_or_default(),
          email:    self.user_email.unwrap_or_default(),
        };
        (Owner::User(id), Identity::Registered(user))
      }
      (None, Some(email)) => {
        let identity = Identity::Anonymous(EmailUser::new(email.clone()));
        (Owner::Email(email), identity)
      }
      _ => return Err(Error::Decode(format!("watch {} has no single owner", self.watch_id))),
    };

    let filters = filters
      .into_iter()
      .map(|(name, value)| Ok((name, decode_filter_value(value)?)))
      .collect::<Result<BTreeMap<_, _>>>()?;

    let watch = Watch {
      watch_id: decode_uuid(&self.watch_id)?,
      event_type: self.event_type,
      content,
      owner,
      secret: self.secret,
      is_active: self.is_active,
      created_at: decode_dt(&self.created_at)?,
      filters,
    };
    Ok(Match { identity, watch })
  }
}

/// Raw strings read directly from a `users` row.
pub struct RawUser {
  pub user_id:  String,
  pub username: String,
  pub email:    String,
}

impl RawUser {
  pub fn into_user(self) -> Result<User> {
    Ok(User {
      user_id:  Some(decode_uuid(&self.user_id)?),
      username: self.username,
      email:    self.email,
    })
  }
}
