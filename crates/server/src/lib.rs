//! HTTP service for the finding/issue synchronization engine.
//!
//! Wires the engines from `tracker-sync` into a running service: an axum
//! router for webhook ingestion and the operator API, the job executor
//! behind the scheduler, and an optional poll loop for trackers without
//! webhook delivery.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod executor;
pub mod poller;
pub mod server;

pub use config::Config;
pub use executor::EngineExecutor;
pub use server::{build_router, AppState};
