//! Page buffer manager and versioned page store for a copy-on-write,
//! multi-version tree database: a sharded buffer cache with CLOCK
//! eviction, a guard/version concurrency protocol, four
//! fragment-combining versioning strategies, a per-transaction intent
//! log, a revision epoch tracker, and the on-disk page reader/writer,
//! segment allocator and resource layout that back them.
//!
//! The higher-level indirect-page tree, record/tree model, query
//! execution and replication are out of scope: this crate starts at
//! "give me the materialised bytes for this page key at this
//! revision" and ends at "here is the byte region to persist".

pub mod allocator;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod database;
pub mod epoch;
pub mod error;
pub mod guard;
pub mod ids;
pub mod instrumented;
pub mod intent_log;
pub mod page;
pub mod reader;
pub mod resource;
pub mod size;
pub mod transaction;
pub mod writer;

pub use config::StorageConfig;
pub use database::Database;
pub use error::{Result, StratumError};
pub use ids::{DatabaseId, IndexNumber, IndexType, LogKey, PageKey, ResourceId, Revision, Slot, StorageKey, SLOTS_PER_PAGE};
pub use instrumented::{InstrumentedDatabase, InstrumentedTransaction, Stats};
pub use page::Page;
pub use page::codec::CodecKind;
pub use page::versioning::VersioningStrategy;
pub use resource::{Resource, ResourceConfig};
pub use transaction::{Transaction, TransactionMode};
