//! Scrollable year calendar: per-day colors and notes over a grow-only run
//! of year blocks, with drag painting, JSON export/import and an optional
//! per-year sync directory.

pub mod annotations;
pub mod cli;
pub mod codec;
pub mod commands;
pub mod config;
pub mod dates;
pub mod interaction;
pub mod logging;
pub mod model;
pub mod remote;
pub mod storage;
pub mod timeline;
pub mod ui;
pub mod year_block;
