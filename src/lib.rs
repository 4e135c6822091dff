//! Client library for the Juno assistant backend.
//!
//! Conversation history paging and grouping, streamed chat replies, the
//! keypad calculator and the countdown timer. The `juno` binary is a thin
//! CLI over these modules.

pub mod attachment;
pub mod calculator;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod history;
pub mod logging;
pub mod storage;
pub mod stream;
pub mod timer;

pub use error::{JunoError, Result};
