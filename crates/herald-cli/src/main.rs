//! `herald`: operator CLI for the Herald watch store.
//!
//! Reads `herald.toml` (or the path given with `--config`), opens the SQLite
//! store and runs one command. Messages are written to stdout as JSON lines.
//!
//! # Usage
//!
//! ```text
//! herald user add alice alice@example.com
//! herald notify edited_document --email fred@example.com --filter locale=en
//! herald fire edited_document --also deleted_document --exclude-user <id>
//! herald unsubscribe <watch-id> <secret> --confirm
//! ```

mod compose;
mod conf;
mod mailer;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand};
use compose::TemplateComposer;
use conf::CliConfig;
use herald_core::{
  courier::Courier,
  event::{Event, EventUnion, Exclude, Fire},
  filter::{FilterValue, Filters},
  identity::{EmailUser, Identity, User, Watcher},
  unsubscribe::{self, Unsubscribe},
  watch::ContentRef,
};
use herald_store_sqlite::SqliteStore;
use mailer::StdoutMailer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

type HeraldCourier = Courier<SqliteStore, StdoutMailer>;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "herald", author, version, about = "Watches and notifications")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "herald.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Manage registered users.
  #[command(subcommand)]
  User(UserCommand),
  /// Watch an event.
  Notify(WatchArgs),
  /// Print whether a watcher has an active watch with exactly these filters.
  Status(WatchArgs),
  /// Remove a watcher's watches with exactly these filters.
  Stop(WatchArgs),
  /// Confirm a pending watch.
  Activate { watch_id: Uuid },
  /// Fire an event and send one message per recipient.
  Fire(FireArgs),
  /// Check an unsubscribe link, or act on it with `--confirm`.
  Unsubscribe {
    watch_id: Uuid,
    secret:   String,
    #[arg(long)]
    confirm:  bool,
  },
  /// Hand anonymous watches on a user's address over to the user.
  Claim { user_id: Uuid },
  /// Drop every watch on a deleted content instance (`type:id`).
  Forget {
    #[arg(value_parser = parse_content)]
    content: ContentRef,
  },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
  /// Register a user and print its id.
  Add { username: String, email: String },
  /// Print a user.
  Show { user_id: Uuid },
  /// Delete a user and all of their watches.
  Remove { user_id: Uuid },
}

#[derive(Args, Debug)]
struct WatchArgs {
  event: String,

  #[command(flatten)]
  watcher: WatcherArgs,

  /// `name=value`; integers are used as-is, anything else is hashed.
  #[arg(long = "filter", value_parser = parse_filter)]
  filters: Vec<(String, FilterValue)>,

  /// Scope to one content instance, as `type:id`.
  #[arg(long, value_parser = parse_content)]
  content: Option<ContentRef>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct WatcherArgs {
  /// Registered user id.
  #[arg(long)]
  user:  Option<Uuid>,
  /// Anonymous email address.
  #[arg(long)]
  email: Option<String>,
}

#[derive(Args, Debug)]
struct FireArgs {
  event: String,

  /// Fire these events too, notifying each recipient once.
  #[arg(long)]
  also: Vec<String>,

  #[arg(long = "filter", value_parser = parse_filter)]
  filters: Vec<(String, FilterValue)>,

  #[arg(long, value_parser = parse_content)]
  content: Option<ContentRef>,

  /// Registered users to leave out.
  #[arg(long)]
  exclude_user: Vec<Uuid>,

  /// Anonymous addresses to leave out.
  #[arg(long)]
  exclude_email: Vec<String>,
}

fn parse_filter(raw: &str) -> Result<(String, FilterValue), String> {
  let (name, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected name=value, got {raw:?}"))?;
  let value = match value.parse::<u32>() {
    Ok(int) => FilterValue::Int(int),
    Err(_) => FilterValue::Text(value.to_owned()),
  };
  Ok((name.to_owned(), value))
}

fn parse_content(raw: &str) -> Result<ContentRef, String> {
  let (content_type, id) = raw
    .rsplit_once(':')
    .ok_or_else(|| format!("expected type:id, got {raw:?}"))?;
  let id = id.parse().map_err(|e| format!("bad object id {id:?}: {e}"))?;
  Ok(ContentRef::new(content_type, id))
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Logs go to stderr; stdout carries messages and results.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = CliConfig::load(&cli.config)?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;
  let courier = Courier::new(store, StdoutMailer, cfg.notifications.clone());

  run(&cfg, &courier, cli.command).await
}

async fn run(cfg: &CliConfig, courier: &HeraldCourier, command: Command) -> anyhow::Result<()> {
  match command {
    Command::User(command) => user(courier, command).await,

    Command::Notify(args) => {
      let watcher = resolve_watcher(courier, &args.watcher).await?;
      let event = event(cfg, &args.event, args.content.clone());
      let watch = event
        .notify(courier, watcher.as_watcher(), &filters(&args.filters))
        .await?;
      println!("{} {}", watch.watch_id, if watch.is_active { "active" } else { "pending" });
      Ok(())
    }

    Command::Status(args) => {
      let watcher = resolve_watcher(courier, &args.watcher).await?;
      let event = event(cfg, &args.event, args.content.clone());
      let notifying = event
        .is_notifying(courier.store(), watcher.as_watcher(), &filters(&args.filters))
        .await?;
      println!("{notifying}");
      Ok(())
    }

    Command::Stop(args) => {
      let watcher = resolve_watcher(courier, &args.watcher).await?;
      let event = event(cfg, &args.event, args.content.clone());
      let removed = event
        .stop_notifying(courier.store(), watcher.as_watcher(), &filters(&args.filters))
        .await?;
      println!("{removed}");
      Ok(())
    }

    Command::Activate { watch_id } => {
      let watch = courier.activate(watch_id).await?;
      tracing::info!(watch_id = %watch.watch_id, event_type = %watch.event_type, "activated");
      Ok(())
    }

    Command::Fire(args) => fire(cfg, courier, args).await,

    Command::Unsubscribe { watch_id, secret, confirm } => {
      if confirm {
        match unsubscribe::confirm(courier.store(), watch_id, &secret).await? {
          Unsubscribe::Removed => println!("removed"),
          Unsubscribe::NotFound => bail!("no watch {watch_id} with that secret"),
        }
      } else {
        match unsubscribe::check(courier.store(), watch_id, &secret).await? {
          Some(watch) => println!("{}", serde_json::to_string(&watch)?),
          None => bail!("no watch {watch_id} with that secret"),
        }
      }
      Ok(())
    }

    Command::Claim { user_id } => {
      let user = require_user(courier, user_id).await?;
      let claimed = courier.claim_watches(&user).await?;
      println!("{claimed}");
      Ok(())
    }

    Command::Forget { content } => {
      let removed = courier.content_deleted(&content).await?;
      println!("{removed}");
      Ok(())
    }
  }
}

async fn user(courier: &HeraldCourier, command: UserCommand) -> anyhow::Result<()> {
  let store = courier.store();
  match command {
    UserCommand::Add { username, email } => {
      let user = store
        .add_user(username, email)
        .await
        .context("failed to add user")?;
      let claimed = courier.claim_watches(&user).await?;
      tracing::info!(username = %user.username, claimed, "user added");
      if let Some(id) = user.user_id {
        println!("{id}");
      }
    }
    UserCommand::Show { user_id } => {
      let user = require_user(courier, user_id).await?;
      println!("{}", serde_json::to_string(&user)?);
    }
    UserCommand::Remove { user_id } => {
      if !store.delete_user(user_id).await? {
        bail!("no user {user_id}");
      }
    }
  }
  Ok(())
}

async fn fire(cfg: &CliConfig, courier: &HeraldCourier, args: FireArgs) -> anyhow::Result<()> {
  let mut excluded: Vec<Identity> = Vec::new();
  for id in &args.exclude_user {
    excluded.push(require_user(courier, *id).await?.into());
  }
  excluded.extend(args.exclude_email.iter().map(|e| Identity::from(EmailUser::new(e.clone()))));
  let exclude = Exclude::from_iter(excluded);

  let build = |name: &str| {
    args
      .filters
      .iter()
      .cloned()
      .fold(event(cfg, name, args.content.clone()), |event, (filter, value)| {
        event.filter(filter, value)
      })
  };

  let sent = if args.also.is_empty() {
    build(&args.event).fire(courier, &exclude).await?
  } else {
    let events = std::iter::once(&args.event).chain(&args.also).map(|name| build(name));
    EventUnion::new(events).fire(courier, &exclude).await?
  };
  tracing::info!(event = %args.event, sent, "fire finished");
  Ok(())
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn event(cfg: &CliConfig, name: &str, content: Option<ContentRef>) -> Event {
  let (kind, template) = cfg.event(name);
  let composer = Arc::new(TemplateComposer::new(name, template, cfg.notifications.clone()));
  match content {
    Some(content) => Event::for_instance(kind, content, composer),
    None => Event::new(kind, composer),
  }
}

fn filters(raw: &[(String, FilterValue)]) -> Filters { raw.iter().cloned().collect() }

enum ResolvedWatcher {
  User(User),
  Email(String),
}

impl ResolvedWatcher {
  fn as_watcher(&self) -> Watcher<'_> {
    match self {
      Self::User(user) => Watcher::User(user),
      Self::Email(email) => Watcher::Email(email),
    }
  }
}

async fn resolve_watcher(
  courier: &HeraldCourier,
  args: &WatcherArgs,
) -> anyhow::Result<ResolvedWatcher> {
  match (args.user, &args.email) {
    (Some(id), _) => Ok(ResolvedWatcher::User(require_user(courier, id).await?)),
    (None, Some(email)) => Ok(ResolvedWatcher::Email(email.clone())),
    (None, None) => bail!("either --user or --email is required"),
  }
}

async fn require_user(courier: &HeraldCourier, id: Uuid) -> anyhow::Result<User> {
  courier
    .store()
    .get_user(id)
    .await?
    .with_context(|| format!("no user {id}"))
}
