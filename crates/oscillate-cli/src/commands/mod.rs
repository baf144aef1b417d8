//! Command implementations for the oscillate CLI

pub mod cleanup;
pub mod data;
pub mod diagnose;
pub mod health;
pub mod info;
pub mod stats;

pub use cleanup::cleanup;
pub use data::{export_data, import_data};
pub use diagnose::diagnose;
pub use health::{health, ready};
pub use info::info;
pub use stats::stats;
