use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;
use crate::record::{Record, INJECTION_WEEK};
use crate::refresh::DataSource;
use crate::week::WeekId;

pub const DEFAULT_BASE_URL: &str = "https://datavaccin-covid.ameli.fr/api/records/1.0/search/";

/// Rows asked for by the count query; only `nhits` is read from the answer.
const COUNT_QUERY_ROWS: u64 = 10;

#[derive(Debug, Deserialize)]
struct CountResponse {
    nhits: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    records: Vec<Record>,
}

/// [`DataSource`] backed by the open-data records search API.
#[derive(Debug, Clone)]
pub struct OpenDataSource {
    client: reqwest::Client,
    base_url: String,
    dataset: String,
}

impl OpenDataSource {
    pub fn new(base_url: &str, dataset: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Http {
                url: base_url.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            dataset: dataset.to_string(),
        })
    }

    fn search_url(&self, week: &WeekId, rows: u64) -> String {
        format!(
            "{}?dataset={}&q=&rows={}&refine.{}={}",
            self.base_url, self.dataset, rows, INJECTION_WEEK, week
        )
    }

    async fn search<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        debug!(url, "querying remote dataset");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|e| SourceError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl DataSource for OpenDataSource {
    async fn count(&self, week: &WeekId) -> Result<u64, SourceError> {
        let url = self.search_url(week, COUNT_QUERY_ROWS);
        let body: CountResponse = self.search(&url).await?;
        Ok(body.nhits)
    }

    async fn fetch(&self, week: &WeekId, rows: u64) -> Result<Vec<Record>, SourceError> {
        let url = self.search_url(week, rows);
        let body: SearchResponse = self.search(&url).await?;
        Ok(body.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DATASET_ID;

    #[test]
    fn test_search_url_carries_week_and_rows() {
        let source = OpenDataSource::new(
            "http://localhost:9/search/",
            DATASET_ID,
            Duration::from_secs(1),
        )
        .unwrap();
        let week: WeekId = "2022-10".parse().unwrap();
        assert_eq!(
            source.search_url(&week, 10),
            "http://localhost:9/search/?dataset=donnees-de-vaccination-par-commune&q=&rows=10&refine.semaine_injection=2022-10"
        );
    }

    #[test]
    fn test_search_response_keeps_extra_keys() {
        let body = r#"{"nhits": 1, "records": [{"datasetid": "d", "recordid": "x",
            "fields": {"classe_age": "65-74"}, "record_timestamp": "t",
            "geometry": {"type": "Point"}}]}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].record_id, "x");
        assert!(parsed.records[0].extra.contains_key("geometry"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        let source = OpenDataSource::new(
            "http://127.0.0.1:9/search/",
            DATASET_ID,
            Duration::from_secs(2),
        )
        .unwrap();
        let week: WeekId = "2022-10".parse().unwrap();
        let err = source.count(&week).await.unwrap_err();
        assert!(matches!(err, SourceError::Http { .. }));
    }
}
