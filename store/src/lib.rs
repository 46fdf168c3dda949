//! Persist and retrieve records from a disk-resident linear hashing index.
//!
//! # Status
//!
//! `linstore` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

pub mod index;
pub mod record;
