//! `taskboard`: Kanban board client with optimistic drag-and-drop reordering.

pub mod board;
pub mod config;
pub mod remote;
