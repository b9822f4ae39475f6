//! Verba Metrics: call-transcript categorisation over a message queue.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod dictionary;
pub mod error;
pub mod health;
pub mod logging;
pub mod pipeline;
pub mod text;
