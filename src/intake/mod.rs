//! Inbound message intake — SMTP listeners and the HTTP endpoint.

pub mod http;
pub mod smtp;
