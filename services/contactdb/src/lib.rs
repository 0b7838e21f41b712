//! Contact database service library crate.
//!
//! # Purpose
//! Exposes the reconciliation engine, its storage backends, the wire-schema validator and the
//! HTTP adapter for use by the binary and the integration tests.
pub mod api;
pub mod app;
pub mod config;
pub mod engine;
pub mod model;
pub mod observability;
pub mod store;
pub mod wire;
