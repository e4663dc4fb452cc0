use std::process;

use chrono::Local;
use datavaccin_lib::{refresh_week, OpenDataSource, RefreshOutcome, SharedStore, WeekId};
use serde_json::Value;
use tracing::error;

use crate::server::config::DvConfig;

/// Fetch one week from the remote dataset.
///
/// With `server` set, the running `serve` process does the refresh on its
/// live store through `POST /refresh`. Without it, the records file is loaded,
/// refreshed and rewritten here, which a running server would later
/// overwrite.
pub async fn run_refresh(
    config_path: &str,
    week_arg: Option<WeekId>,
    data_file_arg: Option<String>,
    server: Option<String>,
    token: Option<String>,
) {
    if let Some(server) = server {
        match request_refresh(&server, token.as_deref(), week_arg).await {
            Ok(summary) => print_summary(&summary),
            Err(e) => {
                error!(server = %server, error = %e, "refresh failed");
                process::exit(1);
            }
        }
        return;
    }

    let mut config = DvConfig::load(config_path);
    config.apply_env_overrides();
    if let Some(data_file) = data_file_arg {
        config.server.data_file = data_file;
    }

    let week = week_arg.unwrap_or_else(|| WeekId::of(Local::now().naive_local()));

    let store = match SharedStore::open(&config.server.data_file) {
        Ok(store) => store,
        Err(e) => {
            error!(path = %config.server.data_file, error = %e, "failed to load records");
            process::exit(1);
        }
    };

    let source = match OpenDataSource::new(
        &config.remote.base_url,
        &config.remote.dataset,
        config.remote.timeout(),
    ) {
        Ok(source) => source,
        Err(e) => {
            error!(error = %e, "failed to build remote client");
            process::exit(1);
        }
    };

    match refresh_week(week, &source, &store, config.refresh.duplicates).await {
        Ok(RefreshOutcome::Refreshed {
            reported,
            appended,
            skipped,
            meta,
            ..
        }) => {
            println!(
                "Week {}: {} reported, {} appended, {} skipped",
                week, reported, appended, skipped
            );
            println!(
                "Wrote {} records to {} at {} (sha1 {})",
                meta.records_count, config.server.data_file, meta.saved_at, meta.hash
            );
        }
        Ok(other) => println!("Week {}: {}", week, other.label()),
        Err(e) => {
            error!(week = %week, error = %e, "refresh failed");
            process::exit(1);
        }
    }
}

/// Ask a running server to refresh `week` (its current week when `None`).
/// Returns the JSON summary it answers with.
async fn request_refresh(
    server: &str,
    token: Option<&str>,
    week: Option<WeekId>,
) -> Result<Value, String> {
    let mut url = format!("{}/refresh", server.trim_end_matches('/'));
    if let Some(week) = week {
        url.push_str(&format!("?week={}", week));
    }

    let mut request = reqwest::Client::new().post(&url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| format!("request to {} failed: {}", url, e))?;
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| format!("unexpected response from {}: {}", url, e))?;

    if !status.is_success() {
        let message = body["message"].as_str().unwrap_or_default();
        return Err(format!("{} answered {}: {}", url, status, message));
    }
    Ok(body)
}

fn print_summary(summary: &Value) {
    if let Some(outcome) = summary["outcome"].as_str() {
        println!("Week {}: {}", summary["week"].as_str().unwrap_or_default(), outcome);
        return;
    }
    println!(
        "Week {}: {} reported, {} appended, {} skipped",
        summary["week"].as_str().unwrap_or_default(),
        summary["reported"],
        summary["appended"],
        summary["skipped"]
    );
    println!(
        "Server wrote {} records at {} (sha1 {})",
        summary["records_count"],
        summary["saved_at"].as_str().unwrap_or_default(),
        summary["hash"].as_str().unwrap_or_default()
    );
}
