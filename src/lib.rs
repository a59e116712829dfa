//! Cytos - real-time multi-agent cell-eating arena simulation engine
//!
//! The crate is organized around one shared binary arena of cell records:
//! - [`arena`] owns the byte layout and the per-type membership directory
//! - [`spatial`] keeps an incrementally-updated quadtree over live cells
//! - [`kernel`] is the batch numeric pass (movement, collisions, queries)
//! - [`engine`] orchestrates the fixed-rate tick over all of the above
//! - [`game`] holds controllers, participant handles, and the built-in bot

pub mod arena;
pub mod core;
pub mod engine;
pub mod game;
pub mod kernel;
pub mod spatial;
