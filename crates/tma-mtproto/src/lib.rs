//! MTProto adapter (grammers).
//!
//! This crate implements the `tma-core` session ports over the grammers
//! client library, including proxy-scoped connections and desktop-format
//! (tdata) session load/export.

pub mod client;
pub mod tdesktop;

pub use client::{GrammersConnector, GrammersSession};
