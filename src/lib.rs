//! # Quality Store
//!
//! Storage and retrieval for chunked code-quality analysis reports.
//!
//! Reports produced by an analysis pipeline are split into overlapping
//! chunks, embedded, and persisted in SQLite together with their metadata
//! (application, focus areas, creation time). They can be fetched back
//! verbatim by `app_id`, listed, deleted, or searched semantically with
//! metadata filters applied before scoring.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌──────────────┐
//! │  Analysis  │──▶│ Chunk + Embed │──▶│   SQLite     │
//! │  reports   │   │  (Retriever)  │   │ vector store │
//! └────────────┘   └───────┬───────┘   └──────┬───────┘
//!                          │                  │
//!                          ▼                  │
//!                  ┌──────────────┐           │
//!                  │ Metadata     │◀──rebuild─┘
//!                  │ index (mem)  │
//!                  └──────────────┘
//! ```
//!
//! Runtime-agnostic logic (models, chunking, index, retrieval) lives in
//! the `quality-store-core` crate; this crate adds configuration, the
//! SQLite store, the embedding backends, and the `qstore` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! qstore init
//! qstore store report.md --app-id billing --focus all
//! qstore query "retries without backoff" --focus availability
//! qstore get billing
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite-backed vector store |
//! | [`embedding`] | Embedding backends and provider selection |
//! | [`session`] | Open/close lifecycle, deadlines, per-app write locks |
//! | [`ingest`] | `store` command |
//! | [`get`] | `get` command |
//! | [`search`] | `query` command |
//! | [`apps`] | `apps` and `delete` commands |

pub mod apps;
pub mod config;
pub mod db;
pub mod embedding;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod session;
pub mod sqlite_store;

pub use quality_store_core::{Result, StoreError};
