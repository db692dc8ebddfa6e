//! Configuration file and environment loading.
//!
//! ```toml
//! store_path = "~/.local/share/herald/watches.db"
//!
//! [notifications]
//! from_address    = "herald@example.com"
//! unsubscribe_url = "https://example.com/unsubscribe/{watch_id}?s={secret}"
//!
//! [events.edited_document]
//! filters = ["locale"]
//! subject = "A document was edited"
//! body    = "Hi {email}, {count} of your watches fired. Stop: {unsubscribe}"
//! ```
//!
//! Every key can be overridden from the environment, e.g.
//! `HERALD_STORE_PATH` or `HERALD_NOTIFICATIONS__FROM_ADDRESS`.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use anyhow::Context as _;
use herald_core::{event::EventType, settings::Settings};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
  pub store_path:    PathBuf,
  pub notifications: Settings,
  pub events:        BTreeMap<String, EventConfig>,
}

impl Default for CliConfig {
  fn default() -> Self {
    Self {
      store_path:    PathBuf::from("herald.db"),
      notifications: Settings::default(),
      events:        BTreeMap::new(),
    }
  }
}

/// One `[events.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventConfig {
  /// Filter names watches on this event may use.
  pub filters: Vec<String>,
  pub subject: String,
  /// Placeholders: `{email}`, `{event}`, `{count}`, `{unsubscribe}`.
  pub body:    String,
}

impl Default for EventConfig {
  fn default() -> Self {
    Self {
      filters: Vec::new(),
      subject: "{event}".to_owned(),
      body:    "{event} happened.\n\nUnsubscribe: {unsubscribe}".to_owned(),
    }
  }
}

impl CliConfig {
  /// Read `path` (if it exists) and `HERALD_*` variables.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = ::config::Config::builder()
      .add_source(::config::File::from(path).required(false))
      .add_source(
        ::config::Environment::with_prefix("HERALD")
          .prefix_separator("_")
          .separator("__"),
      )
      .build()
      .context("failed to read config file")?;

    let mut cfg: Self = settings
      .try_deserialize()
      .context("failed to deserialise configuration")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }

  /// The declaration for `name`. Undeclared events accept no filters.
  pub fn event(&self, name: &str) -> (EventType, EventConfig) {
    let declared = self.events.get(name).cloned().unwrap_or_default();
    let kind = EventType::new(name).with_filters(declared.filters.iter().cloned());
    (kind, declared)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_gives_defaults() {
    let cfg = CliConfig::load(Path::new("/nonexistent/herald.toml")).unwrap();
    assert_eq!(cfg.store_path, PathBuf::from("herald.db"));
    assert!(cfg.notifications.confirm_anonymous_watches);
    assert!(cfg.events.is_empty());
  }

  #[test]
  fn undeclared_events_accept_no_filters() {
    let (kind, declared) = CliConfig::default().event("edited");
    assert_eq!(kind.name(), "edited");
    assert!(kind.filters().is_empty());
    assert_eq!(declared.subject, "{event}");
  }

  #[test]
  fn declared_filters_reach_the_event_type() {
    let mut cfg = CliConfig::default();
    cfg.events.insert("painted".into(), EventConfig {
      filters: vec!["color".into()],
      ..EventConfig::default()
    });
    let (kind, _) = cfg.event("painted");
    assert!(kind.filters().contains("color"));
  }

  #[test]
  fn tilde_expands_to_home() {
    if let Ok(home) = std::env::var("HOME") {
      assert_eq!(expand_tilde(Path::new("~/w.db")), PathBuf::from(home).join("w.db"));
    }
    assert_eq!(expand_tilde(Path::new("/tmp/w.db")), PathBuf::from("/tmp/w.db"));
  }
}
