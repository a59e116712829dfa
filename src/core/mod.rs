//! Core types, errors, and configuration shared by every subsystem

pub mod config;
pub mod error;
pub mod types;
