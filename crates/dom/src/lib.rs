//! Page Monitor DOM Library
//!
//! Everything that can be done without a browser: rebuilding the page dump,
//! walking it into a `SnapshotTree`, diffing two trees and applying or
//! inverting the resulting change list.
//!
//! ## Core Design
//!
//! ```text
//! dump.js JSON → DomArena (NodeId u32) → walk → SnapshotTree → tree.json
//!                                                    ↓
//!                             diff(left, right) → Vec<Change> → apply / invert
//! ```

pub mod arena;
pub mod diff;
pub mod error;
pub mod patch;
pub mod selector;
pub mod serializer;
pub mod service;
pub mod snapshot;
pub mod types;
pub mod utils;
pub mod walker;

pub use arena::DomArena;
pub use diff::{diff, DiffConfig, Priority};
pub use error::{DomError, Result};
pub use patch::{apply, invert};
pub use selector::SelectorList;
pub use serializer::SnapshotSerializer;
pub use service::{DomService, DUMP_SCRIPT};
pub use snapshot::*;
pub use types::*;
pub use walker::{walk, WalkConfig};
