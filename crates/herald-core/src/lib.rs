//! Core types, traits and algorithms for Herald watch notifications.
//!
//! Applications register watches on event types; firing an event resolves the
//! matching watches to a deduplicated set of recipients and hands one message
//! per recipient to a mailer. This crate is free of database and transport
//! dependencies; storage backends implement [`store::WatchStore`].

// `Fire` uses native `async fn` in traits; its futures carry no `Send` bound.
#![allow(async_fn_in_trait)]

pub mod collate;
pub mod courier;
pub mod dedupe;
pub mod error;
pub mod event;
pub mod filter;
pub mod identity;
pub mod settings;
pub mod store;
pub mod unsubscribe;
pub mod watch;

pub use error::{Error, Result};
