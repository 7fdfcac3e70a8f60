//! Outbound messaging for the LINE Messaging API.
//!
//! Two delivery paths exist:
//! - reply: addressed by a single-use reply token issued with an inbound event
//! - push: addressed by the user's stable id, usable at any time

pub mod line;

pub use line::{LineMessagingClient, SendMessageError, TextMessage, DEFAULT_LINE_API_BASE_URL};
