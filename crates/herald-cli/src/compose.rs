//! Plain-text messages rendered from the configured templates.

use herald_core::{
  courier::{Compose, Message},
  dedupe::Recipient,
  settings::Settings,
  watch::Watch,
};

use crate::conf::EventConfig;

pub struct TemplateComposer {
  event:    String,
  template: EventConfig,
  settings: Settings,
}

impl TemplateComposer {
  pub fn new(event: impl Into<String>, template: EventConfig, settings: Settings) -> Self {
    Self { event: event.into(), template, settings }
  }

  /// Unsubscribe link for `watch`, or an empty string when none can be made.
  fn unsubscribe(&self, watch: &Watch) -> String {
    self.settings.unsubscribe_link(watch).unwrap_or_else(|e| {
      tracing::debug!(watch_id = %watch.watch_id, error = %e, "no unsubscribe link");
      String::new()
    })
  }

  fn render(&self, template: &str, email: &str, count: usize, unsubscribe: &str) -> String {
    template
      .replace("{event}", &self.event)
      .replace("{email}", email)
      .replace("{count}", &count.to_string())
      .replace("{unsubscribe}", unsubscribe)
  }
}

impl Compose for TemplateComposer {
  fn compose(&self, recipient: &Recipient) -> Message {
    let email = recipient.identity.email();
    let count = recipient.watches.len();
    let unsubscribe = recipient
      .watches
      .first()
      .map(|watch| self.unsubscribe(watch))
      .unwrap_or_default();
    Message::new(
      email,
      self.render(&self.template.subject, email, count, &unsubscribe),
      self.render(&self.template.body, email, count, &unsubscribe),
    )
  }

  fn confirmation(&self, watch: &Watch, email: &str) -> Message {
    let unsubscribe = self.unsubscribe(watch);
    let mut body = format!(
      "Someone asked to notify {email} about {event}.\n\n\
       Confirm with: herald activate {id}\n",
      event = self.event,
      id = watch.watch_id,
    );
    if !unsubscribe.is_empty() {
      body.push_str(&format!("Not you? {unsubscribe}\n"));
    }
    Message::new(email, format!("Confirm notifications about {}", self.event), body)
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use herald_core::{
    identity::{EmailUser, Identity},
    watch::Owner,
  };
  use uuid::Uuid;

  use super::*;

  fn watch() -> Watch {
    Watch {
      watch_id:   Uuid::from_u128(42),
      event_type: "edited".into(),
      content:    None,
      owner:      Owner::Email("fred@example.com".into()),
      secret:     "abcdefghjk".into(),
      is_active:  true,
      created_at: Utc::now(),
      filters:    Default::default(),
    }
  }

  fn composer(unsubscribe_url: Option<&str>) -> TemplateComposer {
    let settings = Settings {
      unsubscribe_url: unsubscribe_url.map(str::to_owned),
      ..Settings::default()
    };
    let template = EventConfig {
      filters: Vec::new(),
      subject: "{event} for {email}".into(),
      body:    "{count} watches; stop: {unsubscribe}".into(),
    };
    TemplateComposer::new("edited", template, settings)
  }

  #[test]
  fn fills_every_placeholder() {
    let recipient = Recipient {
      identity: Identity::Anonymous(EmailUser::new("fred@example.com")),
      watches:  vec![watch(), watch()],
    };
    let message = composer(Some("https://x.test/u/{watch_id}/{secret}")).compose(&recipient);

    assert_eq!(message.to, vec!["fred@example.com".to_owned()]);
    assert_eq!(message.subject, "edited for fred@example.com");
    assert_eq!(
      message.body,
      format!("2 watches; stop: https://x.test/u/{}/abcdefghjk", Uuid::from_u128(42))
    );
  }

  #[test]
  fn missing_unsubscribe_template_leaves_link_empty() {
    let recipient = Recipient {
      identity: Identity::Anonymous(EmailUser::new("fred@example.com")),
      watches:  vec![watch()],
    };
    let message = composer(None).compose(&recipient);
    assert_eq!(message.body, "1 watches; stop: ");
  }

  #[test]
  fn confirmation_names_the_watch() {
    let message = composer(None).confirmation(&watch(), "fred@example.com");
    assert!(message.body.contains(&Uuid::from_u128(42).to_string()));
    assert!(!message.body.contains("Not you?"));
  }
}
