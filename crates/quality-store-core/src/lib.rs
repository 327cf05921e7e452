//! # Quality Store Core
//!
//! Runtime-agnostic logic for Quality Store: analysis models, chunking,
//! the metadata index, the vector store abstraction, embedding trait and
//! the retrieval engine that composes them.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Concrete embedding backends and the SQLite
//! store live in the `quality-store` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod retrieval;
pub mod store;

pub use error::{Result, StoreError};
