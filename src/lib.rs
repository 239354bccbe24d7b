//! satrelay: answers satellite messenger requests over a narrow text channel.
//!
//! Device mail is scanned for weather or AI requests; answers are encoded
//! into short fragments and delivered back through the reply link the
//! device supplied, falling back to email.

pub mod cli;
pub mod config;
pub mod delivery;
pub mod encoding;
pub mod error;
pub mod inbound;
pub mod llm;
pub mod mail;
pub mod pipeline;

pub use config::Config;
pub use error::{Error, Result};
