//! Shipyard library
//!
//! Composition hardening and the continuous deployment engine of the
//! Shipyard daemon.

pub mod app;
pub mod compose;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod utils;
pub mod webhook;
pub mod workers;
