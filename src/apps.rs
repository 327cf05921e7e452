//! `qstore apps` and `qstore delete`.

use anyhow::Result;

use crate::config::Config;
use crate::session::Session;

/// List every application with a stored analysis, ordered by `app_id`.
pub async fn run_apps(config: &Config, json: bool) -> Result<()> {
    let session = Session::open(config).await?;
    let apps = session.apps();
    session.close().await;
    let apps = apps?;

    if json {
        println!("{}", serde_json::to_string_pretty(&apps)?);
        return Ok(());
    }
    if apps.is_empty() {
        println!("No analyses stored.");
        return Ok(());
    }
    for app in &apps {
        println!("{}\t{}", app.app_id, app.app_name);
    }
    Ok(())
}

/// Remove the analysis of `app_id`. Exits with status 1 when nothing was stored.
pub async fn run_delete(config: &Config, app_id: &str) -> Result<()> {
    let session = Session::open(config).await?;
    let result = session.delete(app_id).await;
    session.close().await;
    let removed = result?;

    if removed == 0 {
        eprintln!("Error: no analysis found for app_id: {}", app_id);
        std::process::exit(1);
    }
    println!("Deleted {}: {} chunk(s)", app_id, removed);
    Ok(())
}
