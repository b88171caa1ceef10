//! Bin-based batching of records.
//!
//! This module provides the two building blocks of the batching engine:
//! - `Bin`: a bounded, mutable batch-in-progress grouping records by key
//! - `BinManager`: owns the set of active bins, handles admission and eviction

mod bin;
mod manager;

pub use bin::{Bin, BinEntry};
pub use manager::BinManager;
