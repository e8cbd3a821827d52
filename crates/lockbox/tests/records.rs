//! Records, result lists and scans against an in-memory store.

use lockbox::{Client, ClientConfig, ErrorKind, KeyMethod, Store};
use lockbox_testkit::{init_tracing, RecordParams, TestFixture, MEMORY_URI};
use proptest::prelude::*;
use serde_json::{json, Value};

const CATEGORY: &str = "testCategory";

fn tags_of(json: &str) -> Value {
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn test_insert_count_fetch_scan() {
    init_tracing();
    let client = Client::embedded(ClientConfig::default()).unwrap();
    let store = Store::provision(&client, MEMORY_URI, KeyMethod::None, None, None, false)
        .await
        .unwrap();

    let tags = json!({"~plaintag": "a", "enctag": "b"}).to_string();
    let session = store.start_session(None, false).await.unwrap();
    session
        .insert(CATEGORY, "testEntry", b"{\"test\":\"value\"}", Some(&tags), None)
        .await
        .unwrap();

    assert_eq!(session.count(CATEGORY, Some(r#"{"~plaintag":"a"}"#)).await.unwrap(), 1);
    assert_eq!(session.count(CATEGORY, Some(r#"{"enctag":"c"}"#)).await.unwrap(), 0);

    let list = session.fetch(CATEGORY, "testEntry", false).await.unwrap().unwrap();
    assert_eq!(list.count().unwrap(), 1);
    assert_eq!(list.category(0).unwrap(), CATEGORY);
    assert_eq!(list.name(0).unwrap(), "testEntry");
    assert_eq!(&list.value(0).unwrap()[..], b"{\"test\":\"value\"}");
    assert_eq!(tags_of(&list.tags(0).unwrap()), tags_of(&tags));
    list.free().unwrap();

    assert!(session.fetch(CATEGORY, "missing", false).await.unwrap().is_none());
    session.close_and_commit().await.unwrap();

    let mut scan = store.start_scan(CATEGORY, None, 0, -1, None).await.unwrap();
    let entries = scan.fetch_remaining().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tags_json().unwrap(), tags_of(&tags));
    scan.free().unwrap();

    assert!(store.close(true).await.unwrap());
}

#[tokio::test]
async fn test_raw_keyed_memory_store_with_named_profile() {
    let client = Client::embedded(ClientConfig::default()).unwrap();
    let pass_key = Store::generate_raw_key(&client, None).unwrap();
    let store = Store::provision(
        &client,
        MEMORY_URI,
        KeyMethod::Raw,
        Some(&pass_key),
        Some("profileA"),
        true,
    )
    .await
    .unwrap();
    assert!(store.handle().is_some());

    let session = store.start_session(Some("profileA"), false).await.unwrap();
    assert!(session.handle().is_some());
    session.insert("cat", "name1", b"val1", None, None).await.unwrap();
    assert_eq!(session.count("cat", None).await.unwrap(), 1);

    let list = session.fetch("cat", "name1", false).await.unwrap().unwrap();
    assert_eq!(list.count().unwrap(), 1);
    assert_eq!(&list.value(0).unwrap()[..], b"val1");
    list.free().unwrap();

    session.close_and_commit().await.unwrap();
    assert!(session.handle().is_none());
    store.close(false).await.unwrap();
}

#[tokio::test]
async fn test_insert_duplicate_and_missing_updates() {
    let fixture = TestFixture::new().await.unwrap();
    fixture.seed("people", "alice", b"1", "{}").await.unwrap();

    let session = fixture.store.start_session(None, false).await.unwrap();
    let err = session
        .insert("people", "alice", b"2", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    assert!(err.to_string().starts_with("'Duplicate' error occurred with ErrorCode"));

    let err = session
        .replace("people", "bob", b"2", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = session.remove("people", "bob").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // The session stays usable after engine errors.
    assert_eq!(session.count("people", None).await.unwrap(), 1);
    session.close_and_commit().await.unwrap();
}

#[tokio::test]
async fn test_replace_and_remove() {
    let fixture = TestFixture::new().await.unwrap();
    fixture.seed("people", "alice", b"1", r#"{"team":"blue"}"#).await.unwrap();

    let session = fixture.store.start_session(None, false).await.unwrap();
    session
        .replace("people", "alice", b"2", Some(r#"{"team":"red"}"#), None)
        .await
        .unwrap();

    let entry = {
        let list = session.fetch("people", "alice", false).await.unwrap().unwrap();
        let entry = list.entry(0).unwrap();
        list.free().unwrap();
        entry
    };
    assert_eq!(&entry.value[..], b"2");
    assert_eq!(entry.tags_json().unwrap(), json!({"team": "red"}));
    assert_eq!(session.count("people", Some(r#"{"team":"blue"}"#)).await.unwrap(), 0);

    session.remove("people", "alice").await.unwrap();
    assert!(session.fetch("people", "alice", false).await.unwrap().is_none());
    session.close_and_commit().await.unwrap();
}

#[tokio::test]
async fn test_fetch_all_and_remove_all() {
    let fixture = TestFixture::new().await.unwrap();
    for (name, team) in [("a", "blue"), ("b", "blue"), ("c", "red")] {
        let tags = json!({ "team": team }).to_string();
        fixture.seed("people", name, b"{}", &tags).await.unwrap();
    }

    let session = fixture.store.start_session(None, false).await.unwrap();

    let all = session.fetch_all("people", None, -1, false).await.unwrap();
    assert_eq!(all.count().unwrap(), 3);
    all.free().unwrap();

    let limited = session.fetch_all("people", None, 2, false).await.unwrap();
    assert_eq!(limited.count().unwrap(), 2);
    limited.free().unwrap();

    let none = session.fetch_all("animals", None, -1, false).await.unwrap();
    assert_eq!(none.count().unwrap(), 0);
    none.free().unwrap();

    let removed = session
        .remove_all("people", Some(r#"{"team":"blue"}"#))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(session.count("people", None).await.unwrap(), 1);
    session.close_and_commit().await.unwrap();
}

#[tokio::test]
async fn test_reads_after_free_fail() {
    let fixture = TestFixture::new().await.unwrap();
    fixture.seed("people", "alice", b"1", "{}").await.unwrap();

    let session = fixture.store.start_session(None, false).await.unwrap();
    let list = session.fetch_all("people", None, -1, false).await.unwrap();

    assert_eq!(list.name(1).unwrap_err().kind(), ErrorKind::Input);

    list.free().unwrap();
    assert_eq!(list.count().unwrap_err().kind(), ErrorKind::Input);
    assert_eq!(list.value(0).unwrap_err().kind(), ErrorKind::Input);
    assert_eq!(list.free().unwrap_err().kind(), ErrorKind::Input);
    session.close_and_commit().await.unwrap();
}

#[tokio::test]
async fn test_scan_offset_and_limit() {
    let fixture = TestFixture::new().await.unwrap();
    let matching = json!({"~plaintag": "a", "enctag": "b"}).to_string();
    let other = json!({"~plaintag": "x", "enctag": "y"}).to_string();
    for (name, tags) in [
        ("a", &matching),
        ("skip-1", &other),
        ("b", &matching),
        ("skip-2", &other),
        ("c", &matching),
    ] {
        fixture.seed(CATEGORY, name, b"{}", tags).await.unwrap();
    }
    fixture.seed("otherCategory", "d", b"{}", &matching).await.unwrap();

    let filter = r#"{"~plaintag":"a","enctag":"b"}"#;
    for (offset, limit, expected) in [(0, -1, 3), (1, -1, 2), (0, 1, 1), (3, -1, 0), (1, 1, 1)] {
        let mut scan = fixture
            .store
            .start_scan(CATEGORY, Some(filter), offset, limit, None)
            .await
            .unwrap();
        let entries = scan.fetch_remaining().await.unwrap();
        assert_eq!(entries.len(), expected, "offset {} limit {}", offset, limit);
        assert!(entries.iter().all(|e| e.name.len() == 1));
        scan.free().unwrap();
    }

    let mut unfiltered = fixture
        .store
        .start_scan(CATEGORY, None, 0, -1, None)
        .await
        .unwrap();
    assert_eq!(unfiltered.fetch_remaining().await.unwrap().len(), 5);
    unfiltered.free().unwrap();

    let err = fixture
        .store
        .start_scan(CATEGORY, Some(filter), 0, -5, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
}

#[tokio::test]
async fn test_scan_pages_and_free() {
    let fixture = TestFixture::new().await.unwrap();
    let session = fixture.store.start_session(None, true).await.unwrap();
    for i in 0..40 {
        session
            .insert("bulk", &format!("item-{:02}", i), b"{}", None, None)
            .await
            .unwrap();
    }
    session.close_and_commit().await.unwrap();

    let mut scan = fixture
        .store
        .start_scan("bulk", None, 0, -1, None)
        .await
        .unwrap();
    assert_eq!(scan.params().unwrap().category, "bulk");

    let first = scan.next().await.unwrap().unwrap();
    assert_eq!(first.count().unwrap(), 32);
    first.free().unwrap();
    let second = scan.next().await.unwrap().unwrap();
    assert_eq!(second.count().unwrap(), 8);
    second.free().unwrap();
    assert!(scan.next().await.unwrap().is_none());

    scan.free().unwrap();
    assert!(scan.handle().is_none());
    assert!(scan.store_handle().is_none());
    assert!(scan.params().is_none());

    let err = scan.next().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Wrapper);
    assert_eq!(err.message(), Some("Cannot fetch from freed scan"));
}

#[tokio::test]
async fn test_transaction_rollback_discards_writes() {
    let fixture = TestFixture::new().await.unwrap();

    let tx = fixture.store.start_session(None, true).await.unwrap();
    tx.insert("people", "alice", b"1", None, None).await.unwrap();
    tx.close_and_rollback().await.unwrap();

    let tx = fixture.store.start_session(None, true).await.unwrap();
    assert_eq!(tx.count("people", None).await.unwrap(), 0);
    tx.insert("people", "bob", b"1", None, None).await.unwrap();
    tx.close_and_commit().await.unwrap();

    let session = fixture.store.start_session(None, false).await.unwrap();
    assert_eq!(session.count("people", None).await.unwrap(), 1);
    session.close_and_commit().await.unwrap();
}

#[tokio::test]
async fn test_profiles_isolate_records() {
    let fixture = TestFixture::new().await.unwrap();
    let store = &fixture.store;
    fixture.seed("people", "alice", b"1", "{}").await.unwrap();

    let default = store.get_profile_name().await.unwrap();
    let other = store.create_profile(Some("other")).await.unwrap();
    assert_eq!(other, "other");
    assert_ne!(default, other);

    let session = store.start_session(Some("other"), false).await.unwrap();
    assert_eq!(session.profile(), Some("other"));
    assert_eq!(session.count("people", None).await.unwrap(), 0);
    session.close_and_commit().await.unwrap();

    let mut scan = store.start_scan("people", None, 0, -1, Some(&default)).await.unwrap();
    assert_eq!(scan.fetch_remaining().await.unwrap().len(), 1);
    scan.free().unwrap();

    assert!(store.remove_profile("other").await.unwrap());
    assert!(!store.remove_profile("other").await.unwrap());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_stored_record_reads_back(params: RecordParams) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let entry = runtime.block_on(async {
            let fixture = TestFixture::new().await.unwrap();
            fixture
                .seed(&params.category, &params.name, &params.value, &params.tags_json())
                .await
                .unwrap();

            let session = fixture.store.start_session(None, false).await.unwrap();
            let list = session
                .fetch(&params.category, &params.name, false)
                .await
                .unwrap()
                .unwrap();
            let entry = list.entry(0).unwrap();
            list.free().unwrap();
            session.close_and_commit().await.unwrap();
            entry
        });

        prop_assert_eq!(&entry.category, &params.category);
        prop_assert_eq!(&entry.name, &params.name);
        prop_assert_eq!(&entry.value[..], &params.value[..]);
        prop_assert_eq!(entry.tags_json().unwrap(), tags_of(&params.tags_json()));
    }
}
