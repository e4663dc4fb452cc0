use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use datavaccin_lib::{DataSource, RefreshJob, RefreshOutcome, SharedStore};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use super::metrics::record_refresh;

/// Longest tick period. Weeks are only noticed on a tick, so a longer period
/// would skip them.
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Run the refresh job every `period` until the task is dropped. The first
/// cycle starts one period after the call.
pub async fn run_scheduler(
    mut job: RefreshJob,
    source: Arc<dyn DataSource>,
    store: SharedStore,
    period: Duration,
) {
    let period = period.clamp(Duration::from_secs(1), MAX_INTERVAL);
    info!(
        interval_secs = period.as_secs(),
        last_check = %job.last_check(),
        "refresh scheduler started"
    );

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        run_tick(&mut job, source.as_ref(), &store, Local::now().naive_local()).await;
    }
}

/// One scheduled cycle: run the job, log and count the outcome. Errors end
/// the cycle only.
pub async fn run_tick(
    job: &mut RefreshJob,
    source: &dyn DataSource,
    store: &SharedStore,
    now: NaiveDateTime,
) -> Option<RefreshOutcome> {
    match job.run_once(now, source, store).await {
        Ok(outcome) => {
            record_refresh(Some(&outcome));
            info!(outcome = outcome.label(), "refresh cycle finished");
            Some(outcome)
        }
        Err(e) => {
            record_refresh(None);
            error!(error = %e, next_check_after = %job.last_check(), "refresh cycle failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::NaiveDate;
    use datavaccin_lib::{
        DuplicatePolicy, OpenDataSource, Record, RecordStore, SourceError, WeekId, DATASET_ID,
    };
    use serde_json::{json, Value};

    use super::*;
    use crate::server::metrics::metrics;

    struct StaticSource(Vec<Record>);

    #[async_trait]
    impl DataSource for StaticSource {
        async fn count(&self, _week: &WeekId) -> Result<u64, SourceError> {
            Ok(self.0.len() as u64)
        }

        async fn fetch(&self, _week: &WeekId, _rows: u64) -> Result<Vec<Record>, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct DownSource;

    #[async_trait]
    impl DataSource for DownSource {
        async fn count(&self, _week: &WeekId) -> Result<u64, SourceError> {
            Err(SourceError::Status {
                url: "http://remote/search/".into(),
                status: 503,
            })
        }

        async fn fetch(&self, _week: &WeekId, _rows: u64) -> Result<Vec<Record>, SourceError> {
            unreachable!("fetch after failed count")
        }
    }

    fn monday_2022_03_07() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 3, 7)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_tick_appends_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::new(RecordStore::new(), dir.path().join("data.json"));
        let source = StaticSource(vec![Record::new("a", chrono::Utc::now())]);
        let mut job = RefreshJob::starting_at("2022-09".parse().unwrap(), DuplicatePolicy::Skip);

        let before = metrics().refresh_runs.with_label_values(&["refreshed"]).get();
        let outcome = run_tick(&mut job, &source, &store, monday_2022_03_07()).await;

        assert_eq!(outcome.map(|o| o.label()), Some("refreshed"));
        assert_eq!(store.len().await, 1);
        assert!(store.path().exists());
        assert!(metrics().refresh_runs.with_label_values(&["refreshed"]).get() > before);
    }

    #[tokio::test]
    async fn test_failed_tick_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::new(RecordStore::new(), dir.path().join("data.json"));
        let mut job = RefreshJob::starting_at("2022-09".parse().unwrap(), DuplicatePolicy::Skip);

        let outcome = run_tick(&mut job, &DownSource, &store, monday_2022_03_07()).await;
        assert!(outcome.is_none());
        assert_eq!(job.last_check(), monday_2022_03_07());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_scheduler_survives_huge_period() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::new(RecordStore::new(), dir.path().join("data.json"));
        let job = RefreshJob::starting_at("2022-09".parse().unwrap(), DuplicatePolicy::Skip);

        let handle = tokio::spawn(run_scheduler(
            job,
            Arc::new(DownSource),
            store,
            Duration::MAX,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }

    type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

    /// Stand-in for the records search API: three entries for 2022-10.
    async fn search(
        State(seen): State<Seen>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        seen.lock().unwrap().push(params.clone());
        let week = params.get("refine.semaine_injection").cloned().unwrap_or_default();
        let rows: usize = params.get("rows").and_then(|r| r.parse().ok()).unwrap_or(0);
        let all: Vec<Value> = if week == "2022-10" {
            (0..3)
                .map(|i| {
                    json!({
                        "datasetid": DATASET_ID,
                        "recordid": format!("remote-{i}"),
                        "fields": {"semaine_injection": "2022-10", "commune_residence": "75056"},
                        "record_timestamp": "2022-03-10T08:00:00.000000+00:00",
                        "geometry": {"type": "Point", "coordinates": [2.35, 48.85]},
                    })
                })
                .collect()
        } else {
            Vec::new()
        };
        let nhits = all.len();
        let records: Vec<Value> = all.into_iter().take(rows).collect();
        Json(json!({ "nhits": nhits, "records": records }))
    }

    #[tokio::test]
    async fn test_tick_against_remote_api() {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/search/", get(search))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let source = OpenDataSource::new(
            &format!("http://{addr}/search/"),
            DATASET_ID,
            Duration::from_secs(5),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::new(RecordStore::new(), dir.path().join("data.json"));
        let mut job = RefreshJob::starting_at("2022-09".parse().unwrap(), DuplicatePolicy::Skip);

        let outcome = run_tick(&mut job, &source, &store, monday_2022_03_07()).await;
        assert_eq!(outcome.map(|o| o.label()), Some("refreshed"));

        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0]["rows"], "10");
            assert_eq!(seen[1]["rows"], "3");
            for query in seen.iter() {
                assert_eq!(query["dataset"], DATASET_ID);
                assert_eq!(query["refine.semaine_injection"], "2022-10");
            }
        }

        let on_disk = RecordStore::load(store.path()).unwrap();
        assert_eq!(on_disk.len(), 3);
        assert!(on_disk.records()[0].extra.contains_key("geometry"));

        // same week again: no query, no write
        std::fs::remove_file(store.path()).unwrap();
        let later = monday_2022_03_07() + chrono::Duration::hours(30);
        let outcome = run_tick(&mut job, &source, &store, later).await;
        assert_eq!(outcome.map(|o| o.label()), Some("same_week"));
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_remote_error_responses() {
        let app = Router::new()
            .route(
                "/down/",
                get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
            )
            .route("/garbage/", get(|| async { "<html>not json</html>" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let source_at = |path: &str| {
            OpenDataSource::new(
                &format!("http://{addr}{path}"),
                DATASET_ID,
                Duration::from_secs(5),
            )
            .unwrap()
        };
        let week: WeekId = "2022-10".parse().unwrap();

        let down = source_at("/down/");
        match down.count(&week).await.unwrap_err() {
            SourceError::Status { status, .. } => assert_eq!(status, 503),
            other => panic!("unexpected error: {other:?}"),
        }
        let garbage = source_at("/garbage/");
        assert!(matches!(
            garbage.fetch(&week, 3).await.unwrap_err(),
            SourceError::Decode { .. }
        ));

        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::new(RecordStore::new(), dir.path().join("data.json"));
        let mut job = RefreshJob::starting_at("2022-09".parse().unwrap(), DuplicatePolicy::Skip);
        let outcome = run_tick(&mut job, &garbage, &store, monday_2022_03_07()).await;
        assert!(outcome.is_none());
        assert!(store.is_empty().await);
        assert!(!store.path().exists());
    }
}
