//! Storage abstraction for the OData execution core.
//!
//! A [`RowStore`] opens transactions ([`StoreTx`]) that read rows with
//! [`FindQuery`] and apply mutations and navigation-link changes. Two backends
//! ship here: [`MemoryStore`] and, behind the `sea-orm` feature, `SqlStore`.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod error;
pub mod eval;
pub mod memory;
pub mod store;
pub mod tracker;

#[cfg(feature = "sea-orm")]
pub mod sql;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use store::{Association, Capabilities, FindQuery, RowStore, Source, StoreTx};
pub use tracker::{ChangeEvent, ChangeTracker, ChangeType, MemoryChangeTracker, TrackerError};

#[cfg(feature = "sea-orm")]
pub use sql::SqlStore;
