//! Batch CSV pipeline: read rows from a folder, normalize their dates, sum an
//! amount per date and load the totals into a SQL table.

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod records;
pub mod sink;
pub mod transform;
