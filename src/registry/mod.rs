//! Per-feed descriptors: which columns to read, which countries are in
//! scope, and how source vocabulary maps onto canonical names.

pub mod feed_descriptor;

pub use feed_descriptor::{ColumnMap, ColumnSpec, CountryScope, FeedDescriptor, RowFilter, VocabRule};
