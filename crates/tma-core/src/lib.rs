//! Core domain + application logic for the mini-app launch-data service.
//!
//! This crate is intentionally framework-agnostic. The MTProto client
//! library and the HTTP surface live behind ports (traits) implemented
//! in adapter crates.

pub mod config;
pub mod credential;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod identity;
pub mod journal;
pub mod logging;
pub mod ports;
pub mod providers;
pub mod proxy;
pub mod resolver;

pub use errors::{Error, Result};
