//! Events: the things people watch, and firing them.
//!
//! An [`EventType`] declares a name and the filter names it accepts. An
//! [`Event`] is an occurrence of a type, optionally about one content
//! instance and carrying the filter values to fire with. An [`EventUnion`]
//! fires several events as one, notifying each recipient once.
//!
//! Events and unions share [`Fire`]: each supplies its key-ordered match
//! streams, and the shared recipient pipeline (collate, then dedupe) and
//! `fire` sit on top.

use std::{collections::BTreeSet, fmt, sync::Arc};

use futures::TryStreamExt as _;

use crate::{
  Error, Result,
  courier::{Compose, Courier, Mailer},
  dedupe::{Recipients, recipients},
  filter::Filters,
  identity::{Identity, Watcher, normalize_email},
  store::{BoxMatchStream, MatchQuery, Order, WatchStore},
  watch::{ContentRef, NewWatch, Owner, Watch, WatchKey, generate_secret},
};

// ─── Event types ─────────────────────────────────────────────────────────────

/// A named kind of event and the filters watches on it may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventType {
  name:    String,
  filters: BTreeSet<String>,
}

impl EventType {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), filters: BTreeSet::new() }
  }

  /// Declare the filter names this type accepts.
  pub fn with_filters<I, N>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = N>,
    N: Into<String>,
  {
    self.filters.extend(names.into_iter().map(Into::into));
    self
  }

  pub fn name(&self) -> &str { &self.name }

  pub fn filters(&self) -> &BTreeSet<String> { &self.filters }

  /// Reject filter names this type never declared.
  pub fn check(&self, filters: &Filters) -> Result<()> {
    match filters.first_undeclared(&self.filters) {
      Some(name) => Err(Error::UnsupportedFilter {
        event_type: self.name.clone(),
        name:       name.to_owned(),
      }),
      None => Ok(()),
    }
  }
}

// ─── Exclusions ──────────────────────────────────────────────────────────────

/// Identities left out when firing.
#[derive(Debug, Clone, Default)]
pub struct Exclude(Vec<Identity>);

impl Exclude {
  pub fn none() -> Self { Self::default() }

  pub fn one(identity: impl Into<Identity>) -> Self { Self(vec![identity.into()]) }

  /// Fill the exclusion lists of `query`. Users must have been persisted.
  fn apply(&self, query: &mut MatchQuery) -> Result<()> {
    for identity in &self.0 {
      match identity {
        Identity::Registered(user) => {
          let id = user
            .user_id
            .ok_or_else(|| Error::InvalidExclude(user.username.clone()))?;
          query.exclude_users.push(id);
        }
        Identity::Anonymous(anon) => {
          query.exclude_emails.push(normalize_email(anon.email()));
        }
      }
    }
    Ok(())
  }
}

impl<T: Into<Identity>> FromIterator<T> for Exclude {
  fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
    Self(iter.into_iter().map(Into::into).collect())
  }
}

// ─── Fire ────────────────────────────────────────────────────────────────────

/// Shared behaviour of single events and unions.
pub trait Fire {
  /// One key-ordered match stream per underlying event. Validates every
  /// query up front; the streams read nothing until polled.
  fn streams<'s, S: WatchStore>(
    &self,
    store: &'s S,
    exclude: &Exclude,
  ) -> Result<Vec<BoxMatchStream<'s, S::Error>>>;

  /// The hook that writes this event's messages.
  fn composer(&self) -> Option<&dyn Compose>;

  /// Unique recipients, each with every watch that selected them, pulled
  /// from the store as the stream is consumed.
  fn recipients<'s, S: WatchStore>(
    &self,
    store: &'s S,
    exclude: &Exclude,
  ) -> Result<Recipients<'s, S::Error>> {
    let streams = self.streams(store, exclude)?;
    Ok(recipients(streams, Order::Ascending))
  }

  /// Send one message per unique recipient. Returns the number enqueued.
  ///
  /// The first composition or enqueue failure aborts the fire; recipients
  /// after it are not processed.
  async fn fire<S: WatchStore, M: Mailer>(
    &self,
    courier: &Courier<S, M>,
    exclude: &Exclude,
  ) -> Result<usize> {
    let mut recipients = self.recipients(courier.store(), exclude)?;
    let Some(composer) = self.composer() else {
      return Ok(0);
    };

    let mut sent = 0;
    while let Some(recipient) = recipients.try_next().await.map_err(Error::store)? {
      let message = composer.compose(&recipient);
      courier.send(message).await.map_err(Error::delivery)?;
      sent += 1;
    }
    tracing::info!(sent, "event fired");
    Ok(sent)
  }
}

// ─── Event ───────────────────────────────────────────────────────────────────

/// An event of one type, optionally scoped to one content instance.
#[derive(Clone)]
pub struct Event {
  kind:     EventType,
  instance: Option<ContentRef>,
  filters:  Filters,
  composer: Arc<dyn Compose>,
}

impl fmt::Debug for Event {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Event")
      .field("kind", &self.kind)
      .field("instance", &self.instance)
      .field("filters", &self.filters)
      .finish_non_exhaustive()
  }
}

impl Event {
  pub fn new(kind: EventType, composer: Arc<dyn Compose>) -> Self {
    Self { kind, instance: None, filters: Filters::new(), composer }
  }

  /// An event about `instance`: every operation is scoped to it.
  pub fn for_instance(kind: EventType, instance: ContentRef, composer: Arc<dyn Compose>) -> Self {
    Self { instance: Some(instance), ..Self::new(kind, composer) }
  }

  /// Set a filter value to fire with.
  pub fn filter(
    mut self,
    name: impl Into<String>,
    value: impl Into<crate::filter::FilterValue>,
  ) -> Self {
    self.filters.insert(name, value);
    self
  }

  pub fn kind(&self) -> &EventType { &self.kind }

  pub fn instance(&self) -> Option<&ContentRef> { self.instance.as_ref() }

  /// Validate everything and build the store query; touches no storage.
  pub(crate) fn match_query(&self, exclude: &Exclude) -> Result<MatchQuery> {
    self.kind.check(&self.filters)?;
    let mut query = MatchQuery {
      event_type: self.kind.name.clone(),
      content: self.instance.clone(),
      filters: self.filters.hashed(),
      order: Order::Ascending,
      ..MatchQuery::default()
    };
    exclude.apply(&mut query)?;
    Ok(query)
  }

  /// The exact lookup key for `watcher`, or `None` for a watcher that can
  /// never own a watch (no email, or a user that was never saved).
  fn key(&self, watcher: Watcher<'_>, filters: &Filters) -> Result<Option<WatchKey>> {
    self.kind.check(filters)?;
    let owner = match watcher {
      Watcher::User(user) => match user.user_id {
        Some(id) => Owner::User(id),
        None => return Ok(None),
      },
      Watcher::Email(email) if email.is_empty() => return Ok(None),
      Watcher::Email(email) => Owner::Email(email.to_owned()),
    };
    Ok(Some(WatchKey {
      event_type: self.kind.name.clone(),
      content: self.instance.clone(),
      owner,
      filters: filters.hashed(),
    }))
  }

  /// Subscribe `watcher` to this event with `filters`.
  ///
  /// Returns the existing watch if an identical one exists. New watches by
  /// registered users are active at once; anonymous ones wait for
  /// confirmation when the settings ask for it. An inactive watch triggers a
  /// confirmation message; if that cannot be sent the watch is removed.
  pub async fn notify<'w, S: WatchStore, M: Mailer>(
    &self,
    courier: &Courier<S, M>,
    watcher: impl Into<Watcher<'w>>,
    filters: &Filters,
  ) -> Result<Watch> {
    let watcher = watcher.into();
    let key = self.key(watcher, filters)?.ok_or_else(|| {
      Error::InvalidWatcher(format!("{watcher:?} cannot own a watch"))
    })?;
    let is_active = watcher.is_registered() || !courier.settings().confirm_anonymous_watches;
    let input = NewWatch { key, secret: generate_secret(), is_active };

    let (watch, created) = courier
      .store()
      .find_or_create_watch(input)
      .await
      .map_err(Error::store)?;
    if created {
      tracing::debug!(
        watch_id = %watch.watch_id,
        event_type = %watch.event_type,
        is_active = watch.is_active,
        "watch created"
      );
    }

    if !watch.is_active {
      let email = watcher.email().to_owned();
      let message = self.composer.confirmation(&watch, &email);
      if let Err(e) = courier.send(message).await {
        tracing::warn!(watch_id = %watch.watch_id, error = %e, "confirmation failed");
        courier
          .store()
          .delete_watch(watch.watch_id)
          .await
          .map_err(Error::store)?;
        return Err(Error::ActivationRequestFailed { email, source: Box::new(e) });
      }
    }
    Ok(watch)
  }

  /// Whether `watcher` has an active watch with exactly `filters`.
  pub async fn is_notifying<'w, S: WatchStore>(
    &self,
    store: &S,
    watcher: impl Into<Watcher<'w>>,
    filters: &Filters,
  ) -> Result<bool> {
    let Some(key) = self.key(watcher.into(), filters)? else {
      return Ok(false);
    };
    let watches = store.find_exact(&key).await.map_err(Error::store)?;
    Ok(watches.iter().any(|w| w.is_active))
  }

  /// Delete `watcher`'s watches with exactly `filters`. Returns how many were
  /// removed; zero is not an error.
  pub async fn stop_notifying<'w, S: WatchStore>(
    &self,
    store: &S,
    watcher: impl Into<Watcher<'w>>,
    filters: &Filters,
  ) -> Result<usize> {
    let Some(key) = self.key(watcher.into(), filters)? else {
      return Ok(0);
    };
    let removed = store.delete_exact(&key).await.map_err(Error::store)?;
    tracing::debug!(event_type = %key.event_type, removed, "stopped notifying");
    Ok(removed)
  }
}

impl Fire for Event {
  fn streams<'s, S: WatchStore>(
    &self,
    store: &'s S,
    exclude: &Exclude,
  ) -> Result<Vec<BoxMatchStream<'s, S::Error>>> {
    let query = self.match_query(exclude)?;
    let stream: BoxMatchStream<'s, S::Error> = Box::pin(store.matching(query));
    Ok(vec![stream])
  }

  fn composer(&self) -> Option<&dyn Compose> { Some(self.composer.as_ref()) }
}

// ─── EventUnion ──────────────────────────────────────────────────────────────

/// Several events fired together. Owns no watches of its own; a person
/// watching more than one member is notified once, using the first member's
/// composer.
#[derive(Debug, Clone, Default)]
pub struct EventUnion {
  events: Vec<Event>,
}

impl EventUnion {
  pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
    Self { events: events.into_iter().collect() }
  }

  pub fn events(&self) -> &[Event] { &self.events }
}

impl Fire for EventUnion {
  fn streams<'s, S: WatchStore>(
    &self,
    store: &'s S,
    exclude: &Exclude,
  ) -> Result<Vec<BoxMatchStream<'s, S::Error>>> {
    // Validate every member before the first stream is opened.
    let queries = self
      .events
      .iter()
      .map(|event| event.match_query(exclude))
      .collect::<Result<Vec<_>>>()?;

    Ok(
      queries
        .into_iter()
        .map(|query| -> BoxMatchStream<'s, S::Error> { Box::pin(store.matching(query)) })
        .collect(),
    )
  }

  fn composer(&self) -> Option<&dyn Compose> {
    self.events.first().and_then(|event| event.composer())
  }
}
