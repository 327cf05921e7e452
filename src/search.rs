//! `qstore query`: semantic search over stored analyses.
//!
//! Filters narrow the candidate chunks through the metadata index before
//! any vector is scored; results carry the best-matching chunk of each
//! application, highest score first.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use quality_store_core::index::MetadataFilter;
use quality_store_core::models::QueryHit;
use quality_store_core::retrieval::QueryRequest;

use crate::config::Config;
use crate::ingest::parse_focus_args;
use crate::session::Session;

/// Options for [`run_query`], as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub focus: Vec<String>,
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<usize>,
    pub json: bool,
}

fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}': expected YYYY-MM-DD", s))
}

fn start_of_day(s: &str) -> Result<DateTime<Utc>> {
    let day = parse_day(s)?;
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .with_context(|| format!("invalid date '{}'", s))
}

fn end_of_day(s: &str) -> Result<DateTime<Utc>> {
    let day = parse_day(s)?;
    day.and_hms_milli_opt(23, 59, 59, 999)
        .map(|dt| dt.and_utc())
        .with_context(|| format!("invalid date '{}'", s))
}

/// Translate command-line options into a [`QueryRequest`].
pub fn build_request(text: &str, opts: &QueryOptions) -> Result<QueryRequest> {
    let mut filter = MetadataFilter::new();
    if let Some(id) = &opts.app_id {
        filter = filter.with_app_id(id.clone());
    }
    if let Some(name) = &opts.app_name {
        filter = filter.with_app_name(name.clone());
    }
    let focus = parse_focus_args(&opts.focus)?;
    if !focus.is_empty() {
        filter = filter.with_focus_areas(focus);
    }
    let after = opts.since.as_deref().map(start_of_day).transpose()?;
    let before = opts.until.as_deref().map(end_of_day).transpose()?;
    if after.is_some() || before.is_some() {
        filter = filter.created_between(after, before);
    }

    let mut request = QueryRequest::new(text).with_filter(filter);
    if let Some(limit) = opts.limit {
        request = request.with_top_k(limit);
    }
    Ok(request)
}

/// Run a query against the configured collection.
pub async fn query(config: &Config, text: &str, opts: &QueryOptions) -> Result<Vec<QueryHit>> {
    let request = build_request(text, opts)?;
    debug!(filter = ?request.filter, top_k = ?request.top_k, "query");

    let session = Session::open(config).await?;
    let result = session.query(&request).await;
    session.close().await;
    Ok(result?)
}

/// CLI entry point.
pub async fn run_query(config: &Config, text: &str, opts: &QueryOptions) -> Result<()> {
    let hits = query(config, text, opts).await?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.2}] {} / {}", i + 1, hit.score, hit.app_name, hit.app_id);
        println!("    chunk: {} (#{})", hit.chunk_id, hit.sequence_index);
        println!("    excerpt: \"{}\"", excerpt(&hit.matched_text, 240));
        println!();
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat.to_string(),
    }
}
