//! Runtime settings for notification dispatch.

use serde::Deserialize;

use crate::{Error, Result, watch::Watch};

/// Deserialised from the `[notifications]` table of the application config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Anonymous watches start unconfirmed and a confirmation message is sent.
  pub confirm_anonymous_watches: bool,
  /// Sender used when a composed message does not set one.
  pub from_address:              String,
  /// Template for unsubscribe links. `{watch_id}` is required, `{secret}` is
  /// optional, e.g. `https://example.com/unsubscribe/{watch_id}?s={secret}`.
  pub unsubscribe_url:           Option<String>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      confirm_anonymous_watches: true,
      from_address:              "notifications@localhost".to_owned(),
      unsubscribe_url:           None,
    }
  }
}

impl Settings {
  /// Render the unsubscribe link for `watch`.
  ///
  /// Fails with [`Error::Configuration`] if no template is configured or the
  /// template cannot identify a watch.
  pub fn unsubscribe_link(&self, watch: &Watch) -> Result<String> {
    let template = self
      .unsubscribe_url
      .as_deref()
      .ok_or_else(|| Error::Configuration("unsubscribe_url is not set".into()))?;
    if !template.contains("{watch_id}") {
      return Err(Error::Configuration(format!(
        "unsubscribe_url {template:?} has no {{watch_id}} placeholder"
      )));
    }
    Ok(
      template
        .replace("{watch_id}", &watch.watch_id.to_string())
        .replace("{secret}", &watch.secret),
    )
  }
}
