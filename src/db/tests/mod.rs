mod cache;

use crate::db::Database;
use crate::types::{QuotaRecord, UserId, UserProfile};
use crate::store::QuotaLedger;
use tempfile::NamedTempFile;

/// Fresh database in a temp file; keep the file alive for the test's duration
async fn open() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

/// Create a user with the given balances
async fn seed_user(db: &Database, id: i64, free: i64, paid: i64) -> QuotaRecord {
    db.ensure_user(&UserProfile::new(id), free).await.unwrap();
    if paid > 0 {
        db.credit(UserId(id), paid, &crate::store::CreditSource::manual("seed"))
            .await
            .unwrap();
    }
    db.get_user(UserId(id)).await.unwrap().unwrap()
}
