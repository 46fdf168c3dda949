//! A disk-resident hash index that grows one bucket at a time.
//!
//! [Index] maps a record's integer key to a fixed-size page of a single blob
//! using linear hashing: instead of doubling when it fills up, the table adds
//! exactly one bucket per growth step and redistributes only the records of
//! the one bucket being divided. Every key remains reachable throughout
//! because addresses that point past the last created bucket are folded back
//! onto the bucket they would have occupied before the split.
//!
//! # Format
//!
//! The index is a single blob of 4096-byte pages. Page `k` starts at byte
//! offset `k * 4096`:
//!
//! ```text
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 |            ...            |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! |  Overflow (i32)   |  Records (i32)    |       Record lines    |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! ```
//!
//! `Overflow` is the page index of the next page in the bucket's chain (-1
//! when the chain ends) and `Records` is the number of record lines in the
//! body. Each line is `id,name,bio,manager_id` closed by a newline, packed
//! contiguously with no padding. Both header fields are little-endian.
//!
//! # Growth
//!
//! An insert lands on the first page of its bucket's chain with room,
//! extending the chain with an overflow page when every page is full. After
//! each insert, if the average stored bytes per bucket exceed 70% of a page,
//! the index appends one bucket, widens its address mask, and drains the
//! divided bucket's old chain onto a fresh replacement chain and the new
//! bucket. Drained pages are overwritten with a `*` fill and their indices
//! are never reused.
//!
//! # Example
//!
//! ```rust
//! use commonware_runtime::{deterministic, Runner};
//! use linstore::{index::{Config, Index}, record::Record};
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     // Create an index
//!     let mut index = Index::init(context, Config {
//!         partition: "partition".to_string(),
//!     }).await.unwrap();
//!
//!     // Store a record
//!     let record = Record::new(1, "Ada".to_string(), "first programmer".to_string(), 7).unwrap();
//!     index.put(record).await.unwrap();
//!
//!     // Retrieve it by key (a miss would be `Ok(None)`, not an error)
//!     let found = index.get(1).await.unwrap();
//!     assert!(found.is_some());
//!
//!     // Close the index
//!     index.close().await.unwrap();
//! });
//! ```

mod storage;
pub use storage::Index;

use thiserror::Error;

/// Errors that can occur when interacting with [Index].
#[derive(Debug, Error)]
pub enum Error {
    #[error("runtime error: {0}")]
    Runtime(#[from] commonware_runtime::Error),
    #[error("record error: {0}")]
    Record(#[from] crate::record::Error),
    #[error("record too large: {0} bytes")]
    RecordTooLarge(usize),
    #[error("page corrupted: {0}")]
    PageCorrupted(u32),
}

/// Configuration for [Index] storage.
#[derive(Clone)]
pub struct Config {
    /// The [commonware_runtime::Storage] partition to use for storing the index.
    pub partition: String,
}
