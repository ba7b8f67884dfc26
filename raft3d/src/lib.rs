//! Replicated inventory of 3D printers, filament spools and print jobs.
//!
//! Every change is a [`engine::Command`] ordered by raft and applied by the
//! same deterministic engine on every node.

pub mod api;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod raft;
pub mod server;
pub mod service;
pub mod state_inventory;
