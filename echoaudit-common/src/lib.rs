//! # EchoAudit Common Library
//!
//! Shared code for the EchoAudit console and its tooling:
//! - Job Service wire types (listing, calls, status, triggers, prompts)
//! - Event types (EchoEvent enum) and the EventBus
//! - Configuration loading
//! - Display names and date/period labels

pub mod api;
pub mod config;
pub mod dates;
pub mod error;
pub mod events;
pub mod keys;
pub mod names;

pub use error::{Error, Result};
pub use keys::{AgentKey, CallKey};
pub use names::NameBook;
