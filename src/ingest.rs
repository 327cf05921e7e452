//! `qstore store`: hand one analysis report to the store.
//!
//! The report is read from a file (or stdin when the path is `-`), wrapped
//! in an [`Analysis`] with the given metadata and stored. Storing an
//! `app_id` that already exists replaces its previous report wholesale.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};

use quality_store_core::models::{Analysis, FocusArea};

use crate::config::Config;
use crate::session::Session;

/// Options for [`run_store`], as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    pub focus: Vec<String>,
    pub meta: Vec<(String, String)>,
}

/// Parse `--focus` values. `all` selects every focus area; values may also
/// be comma-separated (`--focus logging,availability`).
pub fn parse_focus_args(values: &[String]) -> Result<BTreeSet<FocusArea>> {
    let mut areas = BTreeSet::new();
    for part in values.iter().flat_map(|v| v.split(',')) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part.eq_ignore_ascii_case("all") {
            areas.extend(FocusArea::ALL);
        } else {
            areas.insert(part.parse::<FocusArea>()?);
        }
    }
    Ok(areas)
}

fn read_report(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read report from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read report {}", path.display()))
}

/// Build the [`Analysis`] for `report`, filling in defaults for missing
/// identifiers.
pub fn build_analysis(path: &Path, report: String, opts: &StoreOptions) -> Result<Analysis> {
    let app_id = opts
        .app_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let app_name = match &opts.app_name {
        Some(name) => name.clone(),
        None => match path.file_stem().map(|s| s.to_string_lossy().to_string()) {
            Some(stem) if path.as_os_str() != "-" => stem,
            _ => bail!("--app-name is required when reading from stdin"),
        },
    };

    let focus = parse_focus_args(&opts.focus)?;
    let mut analysis = Analysis::new(app_id, app_name, focus, report);
    for (key, value) in &opts.meta {
        analysis = analysis.with_extra(key.clone(), value.clone());
    }
    analysis.validate()?;
    Ok(analysis)
}

/// CLI entry point.
pub async fn run_store(config: &Config, path: &Path, opts: &StoreOptions) -> Result<()> {
    let report = read_report(path)?;
    let analysis = build_analysis(path, report, opts)?;

    let session = Session::open(config).await?;
    let result = session.store(&analysis).await;
    session.close().await;
    let receipt = result?;

    println!(
        "Stored {} ({}): {} chunk(s)",
        receipt.app_id, analysis.app_name, receipt.chunk_count
    );
    if receipt.replaced > 0 {
        println!("  replaced {} chunk(s) from the previous report", receipt.replaced);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_focus_all_and_lists() {
        let all = parse_focus_args(&["all".to_string()]).unwrap();
        assert_eq!(all.len(), 3);

        let two = parse_focus_args(&["logging,availability".to_string()]).unwrap();
        assert!(two.contains(&FocusArea::Logging));
        assert!(two.contains(&FocusArea::Availability));
        assert!(!two.contains(&FocusArea::ErrorHandling));

        assert!(parse_focus_args(&["security".to_string()]).is_err());
        assert!(parse_focus_args(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_build_analysis_defaults() {
        let opts = StoreOptions {
            focus: vec!["error-handling".to_string()],
            meta: vec![("team".to_string(), "payments".to_string())],
            ..Default::default()
        };
        let analysis =
            build_analysis(Path::new("/reports/billing-api.md"), "text".into(), &opts).unwrap();
        assert_eq!(analysis.app_name, "billing-api");
        assert!(uuid::Uuid::parse_str(&analysis.app_id).is_ok());
        assert_eq!(analysis.extra.get("team").map(String::as_str), Some("payments"));
        assert!(analysis.focus_areas.contains(&FocusArea::ErrorHandling));
    }

    #[test]
    fn test_build_analysis_stdin_requires_name() {
        let opts = StoreOptions::default();
        assert!(build_analysis(Path::new("-"), "text".into(), &opts).is_err());

        let named = StoreOptions {
            app_name: Some("Svc".to_string()),
            app_id: Some("svc".to_string()),
            ..Default::default()
        };
        let analysis = build_analysis(Path::new("-"), "text".into(), &named).unwrap();
        assert_eq!(analysis.app_id, "svc");
    }

    #[test]
    fn test_reserved_meta_key_rejected() {
        let opts = StoreOptions {
            meta: vec![("app_id".to_string(), "other".to_string())],
            ..Default::default()
        };
        assert!(build_analysis(Path::new("a.md"), "text".into(), &opts).is_err());
    }
}
