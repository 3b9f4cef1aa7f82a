//! Paginated ingestion from the remote issue tracker.
//!
//! The tracker is an opaque JSON source: paged GETs against `/stories` and
//! `/bugs`, basic-auth credentials, records wrapped in a `Story`/`Bug`
//! envelope per element. Ingestion walks pages until an empty page (or a
//! record without an id) and replaces the local dataset wholesale.
//!
//! Environment: `TRACKER_EP`, `TRACKER_USER`, `TRACKER_PASSWORD`,
//! `TRACKER_WORKSPACE`.

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{Paths, DEFAULT_DATA_FILE};
use crate::error::OpError;
use crate::models::{IssueDataset, IssueRecord};
use crate::store;

/// Tracker connection settings, all from the environment.
#[derive(Debug)]
pub struct TrackerConfig {
    pub endpoint: String,
    pub user: String,
    pub password: String,
    pub workspace_id: String,
}

impl TrackerConfig {
    pub fn from_env() -> Result<TrackerConfig, OpError> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| {
                OpError::Config(format!("missing tracker credential: set {}", name))
            })
        };
        Ok(TrackerConfig {
            endpoint: var("TRACKER_EP")?,
            user: var("TRACKER_USER")?,
            password: var("TRACKER_PASSWORD")?,
            workspace_id: var("TRACKER_WORKSPACE")?,
        })
    }
}

/// Result of `ilens fetch`.
#[derive(Debug, Serialize)]
pub struct FetchReport {
    pub status: &'static str,
    pub stories: usize,
    pub bugs: usize,
    pub data_file: String,
}

/// Fetch both record kinds and overwrite the local dataset.
pub async fn run_fetch(
    paths: &Paths,
    cancel: &CancellationToken,
) -> Result<FetchReport, OpError> {
    let config = TrackerConfig::from_env()?;
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| OpError::Other(e.into()))?;

    let stories = fetch_kind(&http, &config, "stories", "Story", cancel).await?;
    let bugs = fetch_kind(&http, &config, "bugs", "Bug", cancel).await?;

    let dataset = IssueDataset { stories, bugs };
    let path = paths.data_file_path(DEFAULT_DATA_FILE);
    store::save_json(&path, &dataset).map_err(OpError::Other)?;

    Ok(FetchReport {
        status: "success",
        stories: dataset.stories.len(),
        bugs: dataset.bugs.len(),
        data_file: path.display().to_string(),
    })
}

/// Walk one paged collection until the tracker runs out of records.
async fn fetch_kind(
    http: &reqwest::Client,
    config: &TrackerConfig,
    resource: &str,
    envelope: &str,
    cancel: &CancellationToken,
) -> Result<Vec<IssueRecord>, OpError> {
    let url = format!("{}/{}", config.endpoint.trim_end_matches('/'), resource);
    let mut records = Vec::new();
    let mut page = 1u32;

    loop {
        if cancel.is_cancelled() {
            return Err(OpError::Cancelled);
        }

        let response = http
            .get(&url)
            .basic_auth(&config.user, Some(&config.password))
            .query(&[
                ("workspace_id", config.workspace_id.as_str()),
                ("page", &page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| OpError::ApiTransient(format!("tracker request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OpError::ApiTransient(format!(
                "tracker returned HTTP {} for {} page {}: {}",
                status, resource, page, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| OpError::InputMalformed(format!("tracker reply not JSON: {}", e)))?;
        if body.get("status").and_then(Value::as_i64) != Some(1) {
            return Err(OpError::ApiPermanent(format!(
                "tracker rejected {} page {}: {}",
                resource,
                page,
                body.get("info").and_then(Value::as_str).unwrap_or("unknown")
            )));
        }

        let Some(data) = body.get("data").and_then(Value::as_array) else {
            break;
        };
        if data.is_empty() {
            break;
        }

        for element in data {
            let Some(wrapped) = element.get(envelope) else {
                continue;
            };
            let record = parse_record(wrapped)?;
            if record.id.is_empty() {
                // The tracker pads trailing pages with blanks; stop here.
                tracing::warn!(resource, page, "record without id, stopping pagination");
                return Ok(records);
            }
            records.push(record);
        }

        tracing::debug!(resource, page, total = records.len(), "fetched page");
        page += 1;
    }

    Ok(records)
}

/// Deserialize a wire record, pruning null/empty leftovers from the
/// unrecognized-field map.
fn parse_record(value: &Value) -> Result<IssueRecord, OpError> {
    let mut record: IssueRecord = serde_json::from_value(value.clone())
        .map_err(|e| OpError::InputMalformed(format!("bad tracker record: {}", e)))?;
    record
        .extra
        .retain(|_, v| !v.is_null() && v.as_str() != Some(""));
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_prunes_empty_extras() {
        let value = serde_json::json!({
            "id": "1001",
            "name": "需求",
            "effort": "",
            "module": null,
            "business_value": "high",
        });
        let record = parse_record(&value).unwrap();
        assert_eq!(record.id, "1001");
        assert!(!record.extra.contains_key("effort"));
        assert!(!record.extra.contains_key("module"));
        assert_eq!(record.extra["business_value"], "high");
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        // At least one of the four variables is certain to be unset here.
        std::env::remove_var("TRACKER_EP");
        let err = TrackerConfig::from_env().unwrap_err();
        assert_eq!(err.kind(), "config_error");
    }
}
