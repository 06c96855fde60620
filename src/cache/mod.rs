//! Cache module - tiers and the stores behind them
//!
//! Provides:
//! - Storage backends (filesystem and in-process)
//! - Stored entry format
//! - Tiers (volatile `mem`, durable `disk`)
//! - The registry of shared tiers

pub mod memory;
pub mod meta;
pub mod registry;
pub mod store;
pub mod tier;
