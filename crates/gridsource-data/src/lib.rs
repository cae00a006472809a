//! Grouping and paging data source for grid views
//!
//! This crate turns a `Store` (in-memory or callback backed) into pages of rows and group
//! headers, with filtering, sorting, multi-level grouping, summaries and result caching.
//!
//! Modules:
//! * `query`: Load options, filter expressions and the in-memory query engine.
//! * `store`: The store contract plus `ArrayStore` and `CustomStore`.
//! * `runner`: Splits work between the store and local processing, consults the cache.
//! * `cache`: Fingerprinted cache of raw store responses.
//! * `grouping`: Local and remote grouping helpers with their offset bookkeeping.
//! * `source`: The `DataSource` controller exposed to grids.
//! * `config`: Initial data source options, loadable from TOML or JSON.

pub mod cache;
pub mod config;
pub mod grouping;
pub mod item;
pub mod query;
pub mod runner;
pub mod source;
pub mod store;

// Re-export commonly used types at the base
pub use config::{DataSourceOptions, RemoteOperationsSetting};
pub use gridsource_common::{ErrorCode, GridError, Result, Value};
pub use grouping::{GroupingHelper, GroupsInfo, get_continuation_group_count};
pub use item::{GroupItem, GroupPath, Item};
pub use query::{Filter, FilterOp, GroupDescriptor, LoadOptions, Selector, SortDescriptor};
pub use source::{ChangeEvent, ChangeType, DataSource};
pub use store::{ArrayStore, CustomStore, LoadResult, RemoteOperations, Store};
