//! Search Equivalence Tests
//!
//! The hierarchical key-space search must return exactly what a brute-force
//! full listing filtered by the same range/stage predicate returns,
//! deduplicated and sorted, for any range and stage.

use s3tail::key::{prefix_in_range, LogFileKey};
use s3tail::store::InMemoryObjectStore;
use s3tail::search::search;

/// Keys spanning years, months, days, hours, and minutes, two stages,
/// hosts with and without embedded dashes, plus junk that must be ignored.
fn seeded_store() -> (InMemoryObjectStore, Vec<String>) {
    let keys = vec![
        "2022-12-31-23-59-hostA-prod.log",
        "2023-01-01-00-00-hostA-prod.log",
        "2023-01-01-00-00-hostB-prod.log",
        "2023-01-01-00-00-hostA-staging.log",
        "2023-01-01-00-05-hostA-prod.log",
        "2023-01-01-00-05-ip-10-0-0-1-prod.log",
        "2023-01-01-01-00-hostB-prod.log",
        "2023-01-01-12-30-hostC-prod.log",
        "2023-01-02-00-00-hostA-prod.log",
        "2023-02-15-06-45-hostB-prod.log",
        "2023-06-30-23-59-hostC-staging.log",
        "2024-01-01-00-00-hostA-prod.log",
    ];
    let store = InMemoryObjectStore::new();
    for key in &keys {
        store.put(key, b"");
    }
    // noise the search must skip
    store.put("manifest.json", b"");
    store.put("2023-01-01-00-00-README.txt", b"");
    (store, keys.into_iter().map(String::from).collect())
}

/// The predicate the search is specified against: the minute prefix (with
/// its trailing delimiter, as listed) passes the truncated range test at
/// every level, and the filename minus `.log` ends with `-{stage}`.
fn brute_force(keys: &[String], from: &str, to: &str, stage: &str) -> Vec<String> {
    let mut expected: Vec<String> = keys
        .iter()
        .filter(|key| {
            let parsed = match LogFileKey::parse(key) {
                Ok(parsed) => parsed,
                Err(_) => return false,
            };
            let minute_prefix = format!("{}-", parsed.minute());
            prefix_in_range(from, &minute_prefix, to) && parsed.matches_stage(stage)
        })
        .cloned()
        .collect();
    expected.sort();
    expected.dedup();
    expected
}

async fn assert_equivalent(from: &str, to: &str, stage: &str) {
    let (store, keys) = seeded_store();
    let found = search(&store, from, to, stage, 12).await.unwrap();
    let found: Vec<String> = found.iter().map(|k| k.as_str().to_string()).collect();
    assert_eq!(
        found,
        brute_force(&keys, from, to, stage),
        "range [{} .. {}] stage {}",
        from,
        to,
        stage
    );
}

#[tokio::test]
async fn test_equivalence_across_ranges_and_stages() {
    let ranges = [
        ("2023-01-01-00-00", "2023-01-01-00-05"),
        ("2023-01-01-00-00", "2023-01-01-23-59"),
        ("2022-01-01-00-00", "2023-12-31-23-59"),
        ("2023-01-01-00-01", "2023-01-01-00-04"),
        ("2023-01-01-12-00", "2023-02-28-00-00"),
        ("2023-07-01-00-00", "2023-08-01-00-00"), // empty stretch
        ("2000-01-01-00-00", "2001-01-01-00-00"), // before everything
        ("2022-12-31-23-59", s3tail::FAR_FUTURE),
    ];
    for (from, to) in ranges {
        assert_equivalent(from, to, "prod").await;
        assert_equivalent(from, to, "staging").await;
    }
}

#[tokio::test]
async fn test_equivalence_with_unknown_stage() {
    assert_equivalent("2022-01-01-00-00", s3tail::FAR_FUTURE, "qa").await;
}

#[tokio::test]
async fn test_scenario_two_hosts_same_minute() {
    let store = InMemoryObjectStore::new();
    store.put("2023-01-01-00-00-hostA-prod.log", b"");
    store.put("2023-01-01-00-00-hostB-prod.log", b"");

    let found = search(&store, "2023-01-01-00-00", "2023-01-01-00-05", "prod", 12)
        .await
        .unwrap();
    let found: Vec<&str> = found.iter().map(|k| k.as_str()).collect();
    assert_eq!(
        found,
        vec![
            "2023-01-01-00-00-hostA-prod.log",
            "2023-01-01-00-00-hostB-prod.log",
        ]
    );
}

#[tokio::test]
async fn test_concurrency_ceiling_of_one_still_correct() {
    // the fan-out ceiling bounds parallelism, never results
    let (store, keys) = seeded_store();
    let found = search(&store, "2022-01-01-00-00", s3tail::FAR_FUTURE, "prod", 1)
        .await
        .unwrap();
    let found: Vec<String> = found.iter().map(|k| k.as_str().to_string()).collect();
    assert_eq!(
        found,
        brute_force(&keys, "2022-01-01-00-00", s3tail::FAR_FUTURE, "prod")
    );
}
