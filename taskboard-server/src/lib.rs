//! Task server for the taskboard REST API.
//!
//! Serves `/api/v1/tasks` from an in-memory store. Lists are ordered by
//! `position ASC, id ASC` and paginated by cursor, patches follow the
//! lifecycle rules of [`taskboard_proto::task::Task::apply`].

pub mod api;
pub mod config;
pub mod store;
