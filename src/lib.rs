//! Stream building-footprint tiles through the census blocks that contain K-12 schools.
//!
//! Tiles arrive in a watched directory while a downloader is still running. Each tile is
//! checked for completeness, joined against the United States and Canada reference blocks,
//! and the matching buildings are appended to one output dataset. A ledger file makes the
//! work resumable across restarts.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod algorithm;
pub mod config;
pub mod crs;
pub mod error;
pub mod io;
pub mod ledger;
pub mod pipeline;
pub mod processor;
pub mod schedule;
pub mod sink;
pub mod stability;
pub mod store;
pub mod table;
#[cfg(test)]
pub(crate) mod test;
pub mod tiles;
