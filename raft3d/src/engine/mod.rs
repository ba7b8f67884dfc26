//! Inventory Engine Module
//!
//! This module contains the deterministic core of the replicated inventory:
//! - `entry`: Printer, filament and print job records
//! - `command`: The replicated command and its payload encoding
//! - `store`: Lock-guarded inventory shared with readers
//! - `apply`: Interpretation of committed commands
//! - `snapshot`: Point-in-time copies, restore and snapshot sinks
//! - `error`: Error taxonomy of the engine

pub mod apply;
pub mod command;
pub mod entry;
pub mod error;
pub mod snapshot;
pub mod store;

pub use apply::{Applied, ApplyResult};
pub use command::{Command, EntityKind, Operation};
pub use error::{ApplyError, CodecError, ErrorKind, SnapshotError, ValidationError};
pub use snapshot::{FileSnapshotSink, InventorySnapshot, SnapshotSink};
pub use store::{Inventory, Store};
