//! `qstore get`: print the reconstructed report of one application.

use anyhow::Result;

use quality_store_core::models::{join_focus_areas, StoredAnalysis};

use crate::config::Config;
use crate::session::Session;

/// Fetch a stored analysis. A missing `app_id` is
/// [`StoreError::NotFound`](quality_store_core::StoreError::NotFound).
pub async fn get_analysis(config: &Config, app_id: &str) -> Result<StoredAnalysis> {
    let session = Session::open(config).await?;
    let result = session.get(app_id).await;
    session.close().await;
    Ok(result?)
}

/// CLI entry point. Exits with status 1 when the application is unknown.
pub async fn run_get(config: &Config, app_id: &str, json: bool) -> Result<()> {
    let analysis = match get_analysis(config, app_id).await {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    let meta = &analysis.metadata;
    println!("--- Analysis ---");
    println!("app_id:       {}", analysis.app_id);
    println!("app_name:     {}", meta.app_name);
    println!("focus_areas:  {}", join_focus_areas(&meta.focus_areas));
    println!("created_at:   {}", meta.created_at.format("%Y-%m-%dT%H:%M:%SZ"));
    for (key, value) in &meta.extra {
        println!("{:<13} {}", format!("{}:", key), value);
    }
    println!("chunks:       {}", analysis.chunk_count);
    println!();
    println!("--- Report ---");
    println!("{}", analysis.text);

    Ok(())
}
