//! Library entrypoint for DipWatch.
//!
//! This file exists mainly to make the monitor testable (integration tests
//! under `tests/` can import the config, models, stream client and service
//! layers directly).

pub mod config;
pub mod models;

pub mod events;
pub mod stream;

pub mod services;
