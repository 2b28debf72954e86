//! # radar-server
//!
//! Host process library for the radar presence detection system.
//!
//! This library provides the system-backed collaborators the engine scans
//! with, the HTTP API handlers, and logging setup.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod collaborators;
pub mod logging;
pub mod state;
