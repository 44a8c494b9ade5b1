use std::time::Duration;

use bytes::Bytes;
use open_upload::object_store::{
    object_locator, LocalStore, Locator, ObjectStore, ObjectStoreError,
};

fn test_store() -> (tempfile::TempDir, LocalStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path(), "openupload").unwrap();
    (dir, store)
}

#[tokio::test]
async fn test_local_store_put_get() {
    let (_dir, store) = test_store();

    let data = Bytes::from("hello world");
    store
        .put("uploads/1/a.txt", data.clone().into(), data.len() as u64)
        .await
        .unwrap();

    let retrieved = store.get("uploads/1/a.txt").await.unwrap();
    assert_eq!(retrieved, data);
}

#[tokio::test]
async fn test_local_store_put_from_file() {
    let (dir, store) = test_store();
    let source = dir.path().join("spooled");
    std::fs::write(&source, b"spooled bytes").unwrap();

    let file = tokio::fs::File::open(&source).await.unwrap();
    store.put("uploads/2/b.bin", file.into(), 13).await.unwrap();

    assert_eq!(
        store.get("uploads/2/b.bin").await.unwrap(),
        Bytes::from_static(b"spooled bytes")
    );
}

#[tokio::test]
async fn test_local_store_exists_and_delete() {
    let (_dir, store) = test_store();

    assert!(!store.exists("present").await.unwrap());
    store.put("present", "data".into(), 4).await.unwrap();
    assert!(store.exists("present").await.unwrap());

    store.delete("present").await.unwrap();
    assert!(!store.exists("present").await.unwrap());

    // Deleting a nonexistent key should not error
    store.delete("present").await.unwrap();
}

#[tokio::test]
async fn test_local_store_get_not_found() {
    let (_dir, store) = test_store();

    let result = store.get("missing").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_overwrite() {
    let (_dir, store) = test_store();

    store.put("key", "first".into(), 5).await.unwrap();
    store.put("key", "second".into(), 6).await.unwrap();

    assert_eq!(store.get("key").await.unwrap(), Bytes::from("second"));
}

#[tokio::test]
async fn test_local_store_rejects_escaping_keys() {
    let (_dir, store) = test_store();

    for key in ["", "../outside", "uploads/../../etc/passwd", "/absolute"] {
        let result = store.put(key, "x".into(), 1).await;
        assert!(
            matches!(result, Err(ObjectStoreError::InvalidKey(_))),
            "key {key:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn test_local_store_list_by_prefix() {
    let (_dir, store) = test_store();

    store.put("uploads/1/a.png", "aaaa".into(), 4).await.unwrap();
    store.put("uploads/1/nested/b.png", "bb".into(), 2).await.unwrap();
    store.put("uploads/2/c.png", "c".into(), 1).await.unwrap();

    let listed = store.list("uploads/1/").await.unwrap();
    let keys: Vec<&str> = listed.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["uploads/1/a.png", "uploads/1/nested/b.png"]);
    assert_eq!(listed[0].size, 4);
    assert!(listed[0].last_modified.is_some());

    assert_eq!(store.list("").await.unwrap().len(), 3);
    assert!(store.list("uploads/9/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_local_store_cannot_presign() {
    let (_dir, store) = test_store();
    store.put("a.txt", "a".into(), 1).await.unwrap();

    let url = store
        .presign_get("a.txt", Duration::from_secs(900))
        .await
        .unwrap();
    assert!(url.is_none());
}

#[test]
fn test_locator_round_trip() {
    let (_dir, store) = test_store();
    let locator = object_locator(store.bucket(), "uploads/1/2024/05/01/abc/a.png");

    assert_eq!(locator, "s3://openupload/uploads/1/2024/05/01/abc/a.png");
    assert_eq!(
        Locator::parse(&locator).unwrap(),
        Locator::Object {
            bucket: "openupload",
            key: "uploads/1/2024/05/01/abc/a.png",
        }
    );
}
