//! Writes key/value records into Redis from a small batch pipeline.
//!
//! A launch is resolved into a [`config::SinkConfiguration`], turned into a
//! [`pipeline::PipelineGraph`] (`source -> write`) and then either saved as a
//! [`template::Template`] with the Redis endpoint left open, or executed on the
//! [`engine::LocalRunner`] by the [`orchestrator::Orchestrator`].

mod error;
pub use crate::error::{Error, Result};

pub mod config;
pub mod deferred;
pub mod message;

/// Key/value store seam used by the write stage.
pub mod kvstore;

/// Per-worker write stage and its connection lifecycle.
pub mod sinker;

pub mod pipeline;
pub mod template;

/// Bundle-oriented local execution with retries and cancellation.
pub mod engine;

pub mod orchestrator;

/// One-shot connectivity check against a store.
pub mod diagnostic;
