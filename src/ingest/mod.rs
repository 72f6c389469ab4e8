//! Inbound callbacks from edge workers.

pub mod signature;
pub mod webhook;

pub use webhook::{WebhookIngest, WebhookOutcome, WebhookPayload};
