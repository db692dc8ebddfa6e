//! Writes each message to stdout as one JSON line, for a downstream mail
//! relay to pick up.

use std::{
  future::Future,
  io::{self, Write as _},
};

use herald_core::courier::{Mailer, Message};

#[derive(Debug, Default)]
pub struct StdoutMailer;

impl StdoutMailer {
  fn write(&self, message: &Message) -> io::Result<()> {
    let line = serde_json::to_string(message).map_err(io::Error::other)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{line}")?;
    out.flush()
  }
}

impl Mailer for StdoutMailer {
  type Error = io::Error;

  fn send(&self, message: Message) -> impl Future<Output = io::Result<()>> + Send + '_ {
    std::future::ready(self.write(&message))
  }
}
