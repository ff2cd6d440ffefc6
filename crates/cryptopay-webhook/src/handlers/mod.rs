//! HTTP handlers for the webhook listener.
//!
//! - `webhook` - Crypto Pay webhook deliveries
//! - `health` - health probe including the replay store

pub mod health;
pub mod webhook;

pub use health::health_check;
pub use webhook::receive_webhook;
