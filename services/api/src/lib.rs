//! services/api/src/lib.rs
//!
//! The api service: adapters for the core ports, configuration, errors and the web
//! layer (REST, billing and the screen-driving WebSocket).

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
