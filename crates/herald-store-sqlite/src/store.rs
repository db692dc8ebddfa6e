//! [`SqliteStore`]: the SQLite implementation of [`WatchStore`].

use std::{
  collections::{HashMap, VecDeque},
  fmt::Write as _,
  path::Path,
};

use chrono::Utc;
use futures::{Stream, stream};
use rusqlite::{Connection, OptionalExtension as _, TransactionBehavior, types::Value};
use uuid::Uuid;

use herald_core::{
  identity::{User, normalize_email},
  store::{Match, MatchQuery, WatchStore},
  watch::{ContentRef, NewWatch, Watch, WatchKey},
};

use crate::{
  Error, Result,
  encode::{
    RawUser, RawWatch, WATCH_COLUMNS, encode_content, encode_dt, encode_object_id,
    encode_owner, encode_uuid,
  },
  schema::SCHEMA,
};

type RawRows = Vec<(RawWatch, Vec<(String, i64)>)>;

/// Rows fetched per round trip while streaming matches.
pub const DEFAULT_PAGE_SIZE: usize = 256;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Herald watch store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:      tokio_rusqlite::Connection,
  page_size: usize,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, page_size: DEFAULT_PAGE_SIZE };
    store.init_schema().await?;
    tracing::debug!(path = %path.display(), "opened watch store");
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, page_size: DEFAULT_PAGE_SIZE };
    store.init_schema().await?;
    Ok(store)
  }

  /// Set how many rows [`WatchStore::matching`] reads per query.
  pub fn with_page_size(mut self, page_size: usize) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Users ─────────────────────────────────────────────────────────────────

  /// Register a user so it can own watches.
  pub async fn add_user(
    &self,
    username: impl Into<String>,
    email: impl Into<String>,
  ) -> Result<User> {
    let user_id = Uuid::new_v4();
    let user = User {
      user_id:  Some(user_id),
      username: username.into(),
      email:    email.into(),
    };

    let id_str    = encode_uuid(user_id);
    let username  = user.username.clone();
    let email     = user.email.clone();
    let email_key = normalize_email(&user.email);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (user_id, username, email, email_key) VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, username, email, email_key],
        )?;
        Ok(())
      })
      .await?;

    Ok(user)
  }

  /// Retrieve a user by id. Returns `None` if not found.
  pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id, username, email FROM users WHERE user_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawUser {
                  user_id:  row.get(0)?,
                  username: row.get(1)?,
                  email:    row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUser::into_user).transpose()
  }

  /// Delete a user; their watches go with them.
  pub async fn delete_user(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM users WHERE user_id = ?1", rusqlite::params![id_str])?)
      })
      .await?;
    Ok(changed > 0)
  }

  /// Number of stored watches, active or not.
  pub async fn count_watches(&self) -> Result<usize> {
    let count: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM watches", [], |r| r.get(0))?))
      .await?;
    Ok(count as usize)
  }

  /// Fetch the page of matches that follows `after`.
  async fn match_page(&self, query: &MatchQuery, after: Option<&Cursor>) -> Result<Page> {
    let limit = self.page_size;
    let (sql, params) = match_sql(query, after, limit)?;

    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((RawWatch::from_row(row)?, row.get::<_, String>(11)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let ids: Vec<&str> = rows.iter().map(|(raw, _)| raw.watch_id.as_str()).collect();
        let mut filters = filters_for(conn, &ids)?;
        Ok(
          rows
            .into_iter()
            .map(|(raw, email_key)| {
              let own = filters.remove(&raw.watch_id).unwrap_or_default();
              (raw, email_key, own)
            })
            .collect::<Vec<_>>(),
        )
      })
      .await?;

    tracing::trace!(rows = rows.len(), "fetched match page");
    let complete = rows.len() < limit;
    let after = rows.last().map(|(raw, email_key, _)| Cursor::after(raw, email_key));
    let matches = rows
      .into_iter()
      .map(|(raw, _, filters)| raw.into_match(filters))
      .collect::<Result<Vec<_>>>()?;
    Ok(Page { matches, after, complete })
  }
}

// ─── Exact lookups ───────────────────────────────────────────────────────────

/// A [`WatchKey`] in column form, movable onto the database thread.
struct RawKey {
  event_type:   String,
  content_type: Option<String>,
  object_id:    Option<i64>,
  user_id:      Option<String>,
  email_key:    Option<String>,
  /// Sorted by name, like [`filters_for`] returns them.
  filters:      Vec<(String, i64)>,
}

impl RawKey {
  fn new(key: &WatchKey) -> Result<Self> {
    let (content_type, object_id) = encode_content(key.content.as_ref())?;
    let (user_id, _, email_key) = encode_owner(&key.owner);
    Ok(Self {
      event_type: key.event_type.clone(),
      content_type,
      object_id,
      user_id,
      email_key,
      filters: key
        .filters
        .iter()
        .map(|(name, value)| (name.clone(), i64::from(*value)))
        .collect(),
    })
  }
}

/// Filter rows of every watch in `watch_ids`, in one query, grouped by watch
/// and sorted by name.
fn filters_for(
  conn: &Connection,
  watch_ids: &[&str],
) -> rusqlite::Result<HashMap<String, Vec<(String, i64)>>> {
  let mut grouped: HashMap<String, Vec<(String, i64)>> = HashMap::new();
  if watch_ids.is_empty() {
    return Ok(grouped);
  }

  let mut stmt = conn.prepare(&format!(
    "SELECT watch_id, name, value FROM watch_filters
     WHERE watch_id IN ({})
     ORDER BY watch_id, name",
    placeholders(watch_ids.len())
  ))?;
  let rows = stmt.query_map(rusqlite::params_from_iter(watch_ids), |row| {
    Ok((row.get::<_, String>(0)?, row.get(1)?, row.get(2)?))
  })?;
  for row in rows {
    let (watch_id, name, value) = row?;
    grouped.entry(watch_id).or_default().push((name, value));
  }
  Ok(grouped)
}

fn with_filters(conn: &Connection, raws: Vec<RawWatch>) -> rusqlite::Result<RawRows> {
  let ids: Vec<&str> = raws.iter().map(|raw| raw.watch_id.as_str()).collect();
  let mut filters = filters_for(conn, &ids)?;
  Ok(
    raws
      .into_iter()
      .map(|raw| {
        let own = filters.remove(&raw.watch_id).unwrap_or_default();
        (raw, own)
      })
      .collect(),
  )
}

fn fetch_one(conn: &Connection, watch_id: &str) -> rusqlite::Result<Option<RawRows>> {
  let raw = conn
    .query_row(
      &format!(
        "SELECT {WATCH_COLUMNS}
         FROM watches w LEFT JOIN users u ON u.user_id = w.user_id
         WHERE w.watch_id = ?1"
      ),
      rusqlite::params![watch_id],
      RawWatch::from_row,
    )
    .optional()?;
  raw.map(|raw| with_filters(conn, vec![raw])).transpose()
}

/// Watches with exactly `key`, oldest first.
fn exact_rows(conn: &Connection, key: &RawKey) -> rusqlite::Result<RawRows> {
  let mut stmt = conn.prepare_cached(&format!(
    "SELECT {WATCH_COLUMNS}
     FROM watches w LEFT JOIN users u ON u.user_id = w.user_id
     WHERE w.event_type = ?1
       AND w.content_type IS ?2 AND w.object_id IS ?3
       AND w.user_id IS ?4 AND w.email_key IS ?5
     ORDER BY w.created_at, w.watch_id"
  ))?;
  let raws = stmt
    .query_map(
      rusqlite::params![
        key.event_type,
        key.content_type,
        key.object_id,
        key.user_id,
        key.email_key,
      ],
      RawWatch::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let rows = with_filters(conn, raws)?;
  Ok(rows.into_iter().filter(|(_, filters)| *filters == key.filters).collect())
}

fn decode_watches(rows: RawRows) -> Result<Vec<Watch>> {
  rows
    .into_iter()
    .map(|(raw, filters)| raw.into_watch(filters))
    .collect()
}

fn decode_one(rows: Option<RawRows>) -> Result<Option<Watch>> {
  Ok(rows.map(decode_watches).transpose()?.and_then(|w| w.into_iter().next()))
}

// ─── Matching ────────────────────────────────────────────────────────────────

/// Sort expression for the effective (normalized) email of a matched row.
const EMAIL_KEY: &str = "COALESCE(u.email_key, w.email_key)";

/// Position of the last row handed out, in `matching` order. The next page
/// starts strictly after it.
#[derive(Debug, Clone)]
struct Cursor {
  email_key: String,
  anonymous: bool,
  user_id:   String,
  watch_id:  String,
}

impl Cursor {
  fn after(raw: &RawWatch, email_key: &str) -> Self {
    Self {
      email_key: email_key.to_owned(),
      anonymous: raw.user_id.is_none(),
      user_id:   raw.user_id.clone().unwrap_or_default(),
      watch_id:  raw.watch_id.clone(),
    }
  }
}

/// One page of decoded matches.
struct Page {
  matches:  Vec<Match>,
  after:    Option<Cursor>,
  /// Fewer rows than requested came back: nothing follows.
  complete: bool,
}

/// State carried between pages of one `matching` stream.
struct Paging {
  query:     MatchQuery,
  after:     Option<Cursor>,
  buffer:    VecDeque<Match>,
  exhausted: bool,
}

/// Build the SQL for one page of matches and its positional parameters.
///
/// Each requested filter joins `watch_filters` once more, so a watch survives
/// only if it has a row with that name and value for every filter. Rows are
/// keyset-paged on `(email, anonymous, user id, watch id)`.
fn match_sql(
  query: &MatchQuery,
  after: Option<&Cursor>,
  limit: usize,
) -> Result<(String, Vec<Value>)> {
  let mut sql = format!(
    "SELECT {WATCH_COLUMNS}, {EMAIL_KEY}
     FROM watches w LEFT JOIN users u ON u.user_id = w.user_id"
  );
  let mut params = Vec::new();

  for (i, (name, value)) in query.filters.iter().enumerate() {
    let _ = write!(
      sql,
      "
     JOIN watch_filters f{i}
       ON f{i}.watch_id = w.watch_id AND f{i}.name = ? AND f{i}.value = ?"
    );
    params.push(Value::Text(name.clone()));
    params.push(Value::Integer(i64::from(*value)));
  }

  sql.push_str("\n     WHERE w.is_active = 1 AND w.event_type = ?");
  params.push(Value::Text(query.event_type.clone()));

  if let Some(content) = &query.content {
    sql.push_str(" AND w.content_type = ? AND w.object_id = ?");
    params.push(Value::Text(content.content_type.clone()));
    params.push(Value::Integer(encode_object_id(content.object_id)?));
  }

  sql.push_str(" AND COALESCE(u.email_key, w.email_key, '') != ''");

  if !query.exclude_users.is_empty() {
    let _ = write!(
      sql,
      " AND (w.user_id IS NULL OR w.user_id NOT IN ({}))",
      placeholders(query.exclude_users.len())
    );
    params.extend(query.exclude_users.iter().map(|id| Value::Text(encode_uuid(*id))));
  }

  if !query.exclude_emails.is_empty() {
    let _ = write!(
      sql,
      " AND (w.email_key IS NULL OR w.email_key NOT IN ({}))",
      placeholders(query.exclude_emails.len())
    );
    params.extend(query.exclude_emails.iter().map(|e| Value::Text(normalize_email(e))));
  }

  let (direction, beyond) = if query.order.is_descending() { ("DESC", "<") } else { ("ASC", ">") };

  if let Some(cursor) = after {
    let _ = write!(
      sql,
      "
       AND ({EMAIL_KEY} {beyond} ?
            OR ({EMAIL_KEY} = ?
                AND ((w.user_id IS NULL), COALESCE(w.user_id, ''), w.watch_id) > (?, ?, ?)))"
    );
    params.push(Value::Text(cursor.email_key.clone()));
    params.push(Value::Text(cursor.email_key.clone()));
    params.push(Value::Integer(i64::from(cursor.anonymous)));
    params.push(Value::Text(cursor.user_id.clone()));
    params.push(Value::Text(cursor.watch_id.clone()));
  }

  let _ = write!(
    sql,
    "
     ORDER BY {EMAIL_KEY} {direction},
              (w.user_id IS NULL), COALESCE(w.user_id, ''), w.watch_id
     LIMIT ?"
  );
  params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

  Ok((sql, params))
}

fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

// ─── WatchStore impl ─────────────────────────────────────────────────────────

impl WatchStore for SqliteStore {
  type Error = Error;

  async fn find_or_create_watch(&self, input: NewWatch) -> Result<(Watch, bool)> {
    let key                    = RawKey::new(&input.key)?;
    let (_, email, _)          = encode_owner(&input.key.owner);
    let watch_id_str           = encode_uuid(Uuid::new_v4());
    let created_at_str         = encode_dt(Utc::now());
    let secret                 = input.secret;
    let is_active              = input.is_active;

    let (rows, created) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = exact_rows(&tx, &key)?.into_iter().next() {
          tx.commit()?;
          return Ok((vec![existing], false));
        }

        tx.execute(
          "INSERT INTO watches (
             watch_id, event_type, content_type, object_id,
             user_id, email, email_key, secret, is_active, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            watch_id_str,
            key.event_type,
            key.content_type,
            key.object_id,
            key.user_id,
            email,
            key.email_key,
            secret,
            is_active,
            created_at_str,
          ],
        )?;
        for (name, value) in &key.filters {
          tx.execute(
            "INSERT INTO watch_filters (watch_id, name, value) VALUES (?1, ?2, ?3)",
            rusqlite::params![watch_id_str, name, value],
          )?;
        }

        let rows = fetch_one(&tx, &watch_id_str)?.unwrap_or_default();
        tx.commit()?;
        Ok((rows, true))
      })
      .await?;

    let watch = decode_watches(rows)?
      .into_iter()
      .next()
      .ok_or_else(|| Error::Decode("watch vanished after insert".into()))?;
    Ok((watch, created))
  }

  async fn get_watch(&self, id: Uuid) -> Result<Option<Watch>> {
    let id_str = encode_uuid(id);
    let rows = self
      .conn
      .call(move |conn| Ok(fetch_one(conn, &id_str)?))
      .await?;
    decode_one(rows)
  }

  async fn find_exact(&self, key: &WatchKey) -> Result<Vec<Watch>> {
    let key = RawKey::new(key)?;
    let rows = self
      .conn
      .call(move |conn| Ok(exact_rows(conn, &key)?))
      .await?;
    decode_watches(rows)
  }

  async fn activate_watch(&self, id: Uuid) -> Result<Option<Watch>> {
    let id_str = encode_uuid(id);
    let rows = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE watches SET is_active = 1 WHERE watch_id = ?1",
          rusqlite::params![id_str],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        Ok(fetch_one(conn, &id_str)?)
      })
      .await?;
    decode_one(rows)
  }

  async fn delete_watch(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM watches WHERE watch_id = ?1", rusqlite::params![id_str])?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn delete_exact(&self, key: &WatchKey) -> Result<usize> {
    let key = RawKey::new(key)?;
    let removed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let ids: Vec<String> = exact_rows(&tx, &key)?
          .into_iter()
          .map(|(raw, _)| raw.watch_id)
          .collect();
        for id in &ids {
          tx.execute("DELETE FROM watches WHERE watch_id = ?1", rusqlite::params![id])?;
        }
        tx.commit()?;
        Ok(ids.len())
      })
      .await?;
    Ok(removed)
  }

  fn matching(&self, query: MatchQuery) -> impl Stream<Item = Result<Match>> + Send + '_ {
    let paging = Paging { query, after: None, buffer: VecDeque::new(), exhausted: false };
    stream::try_unfold(paging, move |mut paging| async move {
      if paging.buffer.is_empty() && !paging.exhausted {
        let page = self.match_page(&paging.query, paging.after.as_ref()).await?;
        paging.exhausted = page.complete;
        paging.after = page.after;
        paging.buffer.extend(page.matches);
      }
      Ok::<_, Error>(paging.buffer.pop_front().map(|m| (m, paging)))
    })
  }

  async fn delete_for_content(&self, content: &ContentRef) -> Result<usize> {
    let content_type = content.content_type.clone();
    let object_id    = encode_object_id(content.object_id)?;
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM watches WHERE content_type = ?1 AND object_id = ?2",
          rusqlite::params![content_type, object_id],
        )?)
      })
      .await?;
    Ok(removed)
  }

  async fn claim_watches(&self, user: &User) -> Result<usize> {
    let user_id = user
      .user_id
      .ok_or_else(|| Error::UnsavedUser(user.username.clone()))?;
    let id_str    = encode_uuid(user_id);
    let email_key = normalize_email(&user.email);
    let claimed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE watches SET user_id = ?1, email = NULL, email_key = NULL
           WHERE email_key = ?2",
          rusqlite::params![id_str, email_key],
        )?)
      })
      .await?;
    Ok(claimed)
  }
}
