//! hive-hooks - coordination hooks for concurrent coding agents
//!
//! File and task claims, a shared hive tracker, and the Ralph iteration
//! loop, all backed by JSON files under a shared state root.

pub mod commands;
pub mod config;
pub mod coordination;
pub mod error;
pub mod hive;
pub mod hooks;
pub mod identity;
pub mod layout;
pub mod ralph;
pub mod store;
pub mod subprocess;
pub mod telemetry;
pub mod template;
