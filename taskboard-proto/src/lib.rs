//! Shared wire types for the taskboard REST API.

pub mod api;
pub mod patch;
pub mod task;
