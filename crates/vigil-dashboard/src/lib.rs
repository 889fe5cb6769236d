//! Live surveillance dashboard: one push channel and two snapshot polls,
//! reconciled into a single view and rendered with ratatui.

pub mod config;
pub mod connection;
pub mod event;
pub mod poller;
pub mod reconciler;
pub mod render;
pub mod session;
pub mod view;
