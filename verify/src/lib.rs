//! Consistency checks of table and index pages.
//!
//! Every check counts violations and reports each of them as a `warn!`
//! event, the scan never stops at the first problem. Only environment
//! failures (missing privileges, wrong relation kind, I/O) end a scan with
//! an error.

pub mod am;
pub(crate) mod attribute;
pub mod bitmap;
pub mod btree;
pub mod config;
pub mod driver;
pub mod header;
pub mod heap;
pub(crate) mod item;
pub mod offline;
pub mod relation;

pub use config::{BitmapFormat, CheckConfig};
pub use driver::{check_index, check_index_pages, check_table, check_table_pages};
