//! Query building and in-memory evaluation.

pub mod array;
pub mod filter;
pub mod options;

pub use filter::{Condition, Filter, FilterOp, combine_filters, create_offset_filter, group_filter};
pub use options::{
    GroupDescriptor, LoadOptions, Selector, SortDescriptor, SummaryDescriptor, SummaryType,
};
