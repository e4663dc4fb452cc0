use datavaccin_lib::{RecordFilter, RecordStore, SharedStore, StoreError, DATASET_ID};
use serde_json::{json, Value};

fn input(v: Value) -> serde_json::Map<String, Value> {
    v.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_persist_then_reload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.json");

    let store = SharedStore::open(&path).unwrap();
    assert!(store.is_empty().await);

    store
        .create(&input(json!({
            "recordid": "a",
            "commune_residence": "75056",
            "semaine_injection": "2022-10",
            "classe_age": "65-74",
            "taux_termine": 0.91,
        })))
        .await
        .unwrap();
    store
        .create_scoped(
            &input(json!({"recordid": "b", "classe_age": "75+"})),
            &RecordFilter::municipality("01001").week("2022-11"),
        )
        .await
        .unwrap();

    let meta = store.persist().await.unwrap();
    assert_eq!(meta.records_count, 2);
    assert_eq!(meta.hash.len(), 40);

    let reloaded = SharedStore::open(&path).unwrap();
    let all = reloaded.all().await;
    assert_eq!(all, store.all().await);
    assert_eq!(all[0].dataset_id, DATASET_ID);
    assert_eq!(all[1].field("commune_residence"), Some(&json!("01001")));
    assert_eq!(all[1].field("semaine_injection"), Some(&json!("2022-11")));
}

#[tokio::test]
async fn test_unchanged_store_persists_to_same_hash() {
    let dir = tempfile::tempdir().unwrap();
    let store = SharedStore::new(RecordStore::new(), dir.path().join("records.json"));
    store
        .create(&input(json!({"recordid": "a", "date": "2022-03-06"})))
        .await
        .unwrap();

    let first = store.persist().await.unwrap();
    let second = store.persist().await.unwrap();
    assert_eq!(first.hash, second.hash);
    assert!(!dir.path().join("records.json.tmp").exists());
}

#[test]
fn test_load_keeps_unknown_top_level_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.json");
    std::fs::write(
        &path,
        r#"[{"datasetid": "donnees-de-vaccination-par-commune", "recordid": "x",
            "fields": {"commune_residence": "75056"},
            "record_timestamp": "2022-03-10T08:00:00.000000+00:00",
            "geometry": {"type": "Point", "coordinates": [2.35, 48.85]}}]"#,
    )
    .unwrap();

    let store = RecordStore::load(&path).unwrap();
    let saved: Value = serde_json::from_slice(&store.to_json().unwrap()).unwrap();
    assert_eq!(saved[0]["geometry"]["type"], json!("Point"));
    assert_eq!(saved[0]["record_timestamp"], json!("2022-03-10T08:00:00.000000+00:00"));
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.json");
    std::fs::write(&path, "{not json").unwrap();
    assert!(matches!(RecordStore::load(&path), Err(StoreError::Json(_))));
}

#[tokio::test]
async fn test_concurrent_creates_keep_ids_unique() {
    let dir = tempfile::tempdir().unwrap();
    let store = SharedStore::new(RecordStore::new(), dir.path().join("records.json"));

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            // every id is attempted twice
            let id = format!("r{}", i % 16);
            store.create(&input(json!({ "recordid": id }))).await
        }));
    }

    let mut ok = 0;
    let mut dup = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(StoreError::Duplicate(_)) => dup += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok, dup), (16, 16));
    assert_eq!(store.len().await, 16);
}
