//! HTTP API: configuration, authentication, routing and service wiring.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
