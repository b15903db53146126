//! Miscellaneous helpers that don't belong to any one module.

pub mod serde_duration_iso8601;
pub mod serde_duration_millis;
