//! Concierge - customer-support conversational agent core
//!
//! The request path embeds a message, retrieves similar knowledge-base
//! passages, classifies intent and sentiment, generates a reply and decides
//! whether a human should take over. Embeddings go through a tiered cache
//! and a batching dispatcher; every provider call is recorded in a usage
//! ledger and a performance monitor.

pub mod cache;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod knowledge;
pub mod ledger;
pub mod monitor;
pub mod provider;
pub mod testing;

pub use error::{ConciergeError, Result, ValidationError};
