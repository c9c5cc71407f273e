//! Streaming chat-completion engine for OpenAI-compatible backends.
//!
//! [`engine::Engine`] turns a [`provider::Backend`] into a
//! [`provider::ChatProvider`]: requests are built per backend, streamed deltas are
//! held until the attempt proves clean, masked errors and throttling are retried
//! with backoff, and every wait honors the caller's cancellation token.

pub mod bridge;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod http_client;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod provider_factory;
pub mod providers;
pub mod request_builder;
pub mod retry;
pub mod stream;
pub mod telemetry;
pub mod tracker;
#[cfg(test)]
pub mod test_util;

pub use error::{CoreResult, RelayError};
