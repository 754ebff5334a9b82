//! trisync keeps a dataset consistent across a graph store, a vector store,
//! and a relational store when documents are deleted, and replicates the
//! dataset's raw content to a cloud counterpart by content hash.

pub mod commands;
pub mod config;
pub mod delete;
pub mod error;
pub mod graph;
pub mod meta;
pub mod progress;
pub mod retry;
pub mod storage;
pub mod store;
pub mod sync;
