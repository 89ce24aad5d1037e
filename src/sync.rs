//! Outer synchronization loop: cursor persistence, the batch exporter
//! seam, the controller state machine, and reorg repair.

pub mod controller;
pub mod cursor;
pub mod export;
pub mod reorg;

pub use controller::{ControllerSettings, SyncController};
pub use cursor::{Cursor, CursorStore, FileCursorStore, MemoryCursorStore};
pub use export::{Exporter, StoreExporter};
