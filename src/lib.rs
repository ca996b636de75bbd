//! # docq
//!
//! Document generation job orchestrator.
//!
//! Accepts requests for a multi-part deliverable (narrative, compliance memo,
//! rendered file), runs the parts in order against external generators under
//! a global concurrency ceiling, retries transient failures with backoff,
//! enforces per-job deadlines, and keeps finished jobs queryable for a
//! retention window.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod llm;
pub mod model;
pub mod render;
pub mod service;
pub mod telemetry;
