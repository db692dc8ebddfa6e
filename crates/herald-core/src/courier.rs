//! Message composition and hand-off to delivery.
//!
//! Rendering and transport live outside this crate. Events ask a [`Compose`]
//! implementation for message contents and pass the result to a [`Mailer`],
//! which only has to accept it for later delivery.

use std::{
  convert::Infallible,
  future::Future,
  sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  dedupe::Recipient,
  identity::User,
  settings::Settings,
  store::WatchStore,
  watch::{self, ContentRef, Watch},
};

// ─── Messages ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  /// Filled from [`Settings::from_address`] when left empty.
  pub from:    Option<String>,
  pub to:      Vec<String>,
  pub subject: String,
  pub body:    String,
}

impl Message {
  pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
    Self { from: None, to: vec![to.into()], subject: subject.into(), body: body.into() }
  }
}

/// Builds the messages an event sends.
pub trait Compose: Send + Sync {
  /// The notification for one recipient of a fired event.
  fn compose(&self, recipient: &Recipient) -> Message;

  /// The request to confirm a new, inactive watch.
  fn confirmation(&self, watch: &Watch, email: &str) -> Message;
}

/// Accepts messages for asynchronous delivery. Errors are enqueue-time
/// failures only.
pub trait Mailer: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn send(&self, message: Message) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

/// A mailer that keeps everything it is given.
#[derive(Debug, Default)]
pub struct Outbox {
  sent: Mutex<Vec<Message>>,
}

impl Outbox {
  pub fn new() -> Self { Self::default() }

  pub fn messages(&self) -> Vec<Message> {
    self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn len(&self) -> usize { self.sent.lock().unwrap_or_else(PoisonError::into_inner).len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Mailer for Outbox {
  type Error = Infallible;

  fn send(&self, message: Message) -> impl Future<Output = Result<(), Infallible>> + Send + '_ {
    self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(message);
    std::future::ready(Ok(()))
  }
}

// ─── Courier ─────────────────────────────────────────────────────────────────

/// The store, the mailer and the settings that event operations run against.
pub struct Courier<S, M> {
  store:    S,
  mailer:   M,
  settings: Settings,
}

impl<S: WatchStore, M: Mailer> Courier<S, M> {
  pub fn new(store: S, mailer: M, settings: Settings) -> Self {
    Self { store, mailer, settings }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn mailer(&self) -> &M { &self.mailer }

  pub fn settings(&self) -> &Settings { &self.settings }

  /// Send `message`, defaulting its sender.
  pub async fn send(&self, mut message: Message) -> Result<(), M::Error> {
    if message.from.is_none() {
      message.from = Some(self.settings.from_address.clone());
    }
    self.mailer.send(message).await
  }

  /// Confirm the watch `watch_id`.
  pub async fn activate(&self, watch_id: Uuid) -> Result<Watch> {
    watch::activate(&self.store, watch_id).await
  }

  /// Cascade for a deleted content instance: drop every watch on it.
  pub async fn content_deleted(&self, content: &ContentRef) -> Result<usize> {
    let removed = self.store.delete_for_content(content).await.map_err(Error::store)?;
    tracing::debug!(
      content_type = %content.content_type,
      object_id = content.object_id,
      removed,
      "watches removed with their content"
    );
    Ok(removed)
  }

  /// Hand anonymous watches on a newly registered user's address over to
  /// that user.
  pub async fn claim_watches(&self, user: &User) -> Result<usize> {
    if !user.is_persisted() {
      return Err(Error::InvalidWatcher(format!(
        "user {:?} has no persisted id",
        user.username
      )));
    }
    let claimed = self.store.claim_watches(user).await.map_err(Error::store)?;
    tracing::info!(username = %user.username, claimed, "claimed anonymous watches");
    Ok(claimed)
  }
}
