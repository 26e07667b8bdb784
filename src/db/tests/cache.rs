use super::open;
use crate::error::{DatabaseError, Error};
use crate::store::ResultCache;
use crate::types::{CacheEntry, Fingerprint, MediaKind, MediaMetadata, ResultDescriptor};

fn entry(ids: &[&str]) -> CacheEntry {
    CacheEntry {
        descriptor: ResultDescriptor {
            kind: MediaKind::Video,
            file_ids: ids.iter().map(|s| s.to_string()).collect(),
        },
        metadata: MediaMetadata {
            width: Some(1280),
            height: Some(720),
            duration_secs: Some(61.5),
            title: None,
        },
        caption: Some("via @bot".into()),
    }
}

#[tokio::test]
async fn test_put_get_replace() {
    let (db, _file) = open().await;
    let key = Fingerprint("f00d".into());

    assert!(db.get(&key).await.unwrap().is_none());

    db.put(&key, &entry(&["a", "b"])).await.unwrap();
    assert_eq!(db.get(&key).await.unwrap(), Some(entry(&["a", "b"])));

    db.put(&key, &entry(&["c"])).await.unwrap();
    assert_eq!(db.get(&key).await.unwrap(), Some(entry(&["c"])));
    assert_eq!(db.count().await.unwrap(), 1);

    db.close().await;
}

#[tokio::test]
async fn test_delete_and_clear() {
    let (db, _file) = open().await;
    for i in 0..3 {
        db.put(&Fingerprint(format!("k{}", i)), &entry(&["x"]))
            .await
            .unwrap();
    }

    assert!(db.delete(&Fingerprint("k0".into())).await.unwrap());
    assert!(!db.delete(&Fingerprint("k0".into())).await.unwrap());
    assert_eq!(db.count().await.unwrap(), 2);

    assert_eq!(db.clear().await.unwrap(), 2);
    assert_eq!(db.count().await.unwrap(), 0);

    db.close().await;
}

#[tokio::test]
async fn test_corrupt_descriptor_is_reported() {
    let (db, _file) = open().await;
    sqlx::query(
        "INSERT INTO result_cache (fingerprint, descriptor, metadata, created_at) VALUES ('bad', 'not json', '{}', 0)",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let err = db.get(&Fingerprint("bad".into())).await.unwrap_err();
    assert!(matches!(err, Error::Database(DatabaseError::Corrupt(_))));

    db.close().await;
}
