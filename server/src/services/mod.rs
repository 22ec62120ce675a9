//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own board state and persistence so route handlers can
//! stay focused on protocol translation.

pub mod board;
pub mod paint;
pub mod persistence;
