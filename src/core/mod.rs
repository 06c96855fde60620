//! Core module - Contains the fundamental data structures and utilities
//!
//! This module provides:
//! - Cache key derivation and non-finite float checks
//! - Report model and rendering for operational output
//! - Cache naming and location parsing
//! - Hashing and size utilities
//! - Logging setup for the binary

pub mod finite;
pub mod key;
pub mod logging;
pub mod model;
pub mod paths;
pub mod render;
pub mod util;
