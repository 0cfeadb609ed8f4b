//! # proxlock-server
//!
//! Daemon library for proxlock: hosts the proximity monitor, turns its
//! NEAR/AWAY callbacks into lock decisions and exposes them over HTTP.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod dispatch;
pub mod logging;
pub mod settings;
pub mod state;
