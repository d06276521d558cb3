//! mail-relay — a small SMTP/HTTP relay that fans inbound messages out to
//! Gmail forwarding and Home Assistant push notifications.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod message;
pub mod sinks;
