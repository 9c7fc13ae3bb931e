//! Shared constants and path helpers.

pub mod paths;
