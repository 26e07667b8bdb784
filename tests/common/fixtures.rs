//! Downloader fixtures backed by a real SQLite database and the real HTTP fetcher

use super::FakeChat;
use media_dl::maintenance::ExtractorMaintenance;
use media_dl::media::NoOpMediaTools;
use media_dl::strategy::HttpFetcher;
use media_dl::{
    Components, Config, CreditSource, Database, MediaDownloader, MediaRequest, MessageRef,
    QuotaLedger, StrategyRegistry, UserId, UserProfile,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// A downloader with everything it talks to
pub struct TestBed {
    pub downloader: MediaDownloader,
    pub db: Arc<Database>,
    pub chat: Arc<FakeChat>,
    next_message: AtomicI64,
    _dir: TempDir,
}

/// Small limits and fast retries so scenarios stay quick
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.delivery.temp_dir = dir.path().join("temp");
    config.delivery.max_file_size = 1_000;
    config.delivery.hard_ceiling_multiple = 4;
    config.delivery.progress_interval = Duration::from_secs(3600);
    config.persistence.database_path = dir.path().join("media-dl.db");
    config.quota.free_daily = 0;
    config.retry.max_attempts = 1;
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(1);
    config.retry.jitter = false;
    config
}

/// Build a test bed, letting the caller adjust the configuration first
pub async fn create_test_bed(configure: impl FnOnce(&mut Config)) -> TestBed {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    configure(&mut config);

    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let chat = Arc::new(FakeChat::default());
    let http = HttpFetcher::new(&config.delivery).unwrap();

    let downloader = MediaDownloader::with_components(
        config.clone(),
        Components {
            ledger: db.clone(),
            cache: db.clone(),
            settings: db.clone(),
            transport: chat.clone(),
            media: Arc::new(NoOpMediaTools),
            maintenance: Arc::new(ExtractorMaintenance::disabled()),
            registry: StrategyRegistry::new(config.extractor.extractor_fallback),
            fetchers: vec![Arc::new(http)],
        },
    );

    TestBed {
        downloader,
        db,
        chat,
        next_message: AtomicI64::new(1),
        _dir: dir,
    }
}

impl TestBed {
    /// Create a user with the given balance
    pub async fn seed(&self, id: i64, free: i64, paid: i64) {
        self.db
            .ensure_user(&UserProfile::new(id), free)
            .await
            .unwrap();
        if paid > 0 {
            self.db
                .credit(UserId(id), paid, &CreditSource::manual("seed"))
                .await
                .unwrap();
        }
    }

    /// Current (free, paid) balance of a user
    pub async fn balance(&self, id: i64) -> (i64, i64) {
        let record = self.db.get_user(UserId(id)).await.unwrap().unwrap();
        (record.free, record.paid)
    }

    /// (daily, lifetime) bandwidth of a user
    pub async fn bandwidth(&self, id: i64) -> (u64, u64) {
        let record = self.db.get_user(UserId(id)).await.unwrap().unwrap();
        (record.bandwidth_used, record.total_bandwidth)
    }

    /// A request from `user` in their private chat
    pub fn request(&self, user: i64, url: &str) -> MediaRequest {
        let message_id = self.next_message.fetch_add(1, Ordering::SeqCst);
        MediaRequest::new(UserProfile::new(user), MessageRef::new(user, message_id), url)
    }
}
