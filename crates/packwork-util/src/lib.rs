#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for packwork.
//!
//! Pure helpers with no logging dependencies. Logging is owned by the CLI
//! crate so library crates stay lightweight.

pub mod fs;
pub mod hash;
