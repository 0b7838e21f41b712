//! Contact database HTTP API module.
//!
//! # Purpose
//! Route handlers and payload types. Handlers only translate between HTTP and the engine.
pub mod commit;
pub mod error;
pub mod openapi;
pub mod orgs;
pub mod system;
pub mod types;
