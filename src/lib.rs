//! Specchio renders markdown documents into HTML and mirrors the result to
//! connected browsers over a WebSocket push channel.
//!
//! The interesting machinery lives in [`application::render`] (the
//! incremental rendering pipeline) and [`application::preview`] (the
//! debounce/broadcast coordinator). Everything else is transport and
//! configuration glue around those two.

pub mod application;
pub mod config;
pub mod infra;
pub mod presentation;
