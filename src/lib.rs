//! Conflux - hybrid dense + lexical retrieval
//!
//! Maintains a dense vector index and a BM25 lexical index over the same
//! chunk corpus, queries both concurrently and fuses their normalized scores
//! into one ranked list with filters, facets and sorting. One path failing
//! degrades the response instead of failing it.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexing;
pub mod retrieval;
pub mod service;
pub mod storage;

pub use error::{ConfluxError, Result};
