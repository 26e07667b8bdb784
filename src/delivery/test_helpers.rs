//! Shared test doubles for the delivery, transfer and maintenance tests.

use super::{Components, MediaDownloader, MediaRequest};
use crate::config::{Config, RetryConfig};
use crate::error::FetchError;
use crate::maintenance::{ExtractorMaintenance, ExtractorUpdater};
use crate::media::MediaTools;
use crate::store::{MemoryStore, QuotaLedger};
use crate::strategy::{FetchJob, Fetcher, StrategyRegistry};
use crate::transport::{
    ChatTransport, FileSource, Markup, SentFile, TransportError, Upload, UploadProgress,
};
use crate::types::{
    ChatId, MediaKind, MediaMetadata, MessageRef, QuotaRecord, StrategyKind, UserId, UserProfile,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Chat transport that records everything and fails on request
#[derive(Default)]
pub(crate) struct RecordingTransport {
    next_id: AtomicI64,
    texts: Mutex<Vec<(ChatId, String)>>,
    edits: Mutex<Vec<(MessageRef, String, Markup)>>,
    files: Mutex<Vec<(ChatId, Upload)>>,
    uploaded_sizes: Mutex<Vec<u64>>,
    copies: Mutex<Vec<(ChatId, MessageRef)>>,
    rejected_kinds: Mutex<HashSet<MediaKind>>,
    failing_chats: Mutex<HashSet<ChatId>>,
    stale_handles: Mutex<bool>,
    rate_limits: AtomicUsize,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(500),
            ..Default::default()
        })
    }

    /// Uploads of this kind are rejected
    pub(crate) fn reject_kind(&self, kind: MediaKind) {
        self.rejected_kinds.lock().unwrap().insert(kind);
    }

    /// Every call targeting this chat fails
    pub(crate) fn fail_chat(&self, chat: i64) {
        self.failing_chats.lock().unwrap().insert(ChatId(chat));
    }

    /// Cached file handles are rejected
    pub(crate) fn expire_handles(&self) {
        *self.stale_handles.lock().unwrap() = true;
    }

    /// The next `count` uploads are rate limited
    pub(crate) fn rate_limit(&self, count: usize) {
        self.rate_limits.store(count, Ordering::SeqCst);
    }

    pub(crate) fn texts(&self) -> Vec<(ChatId, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub(crate) fn edits(&self) -> Vec<(MessageRef, String, Markup)> {
        self.edits.lock().unwrap().clone()
    }

    pub(crate) fn last_edit(&self) -> Option<(String, Markup)> {
        self.edits
            .lock()
            .unwrap()
            .last()
            .map(|(_, text, markup)| (text.clone(), markup.clone()))
    }

    pub(crate) fn files(&self) -> Vec<(ChatId, Upload)> {
        self.files.lock().unwrap().clone()
    }

    /// On-disk size of every accepted path upload, at send time
    pub(crate) fn uploaded_sizes(&self) -> Vec<u64> {
        self.uploaded_sizes.lock().unwrap().clone()
    }

    pub(crate) fn copies(&self) -> Vec<(ChatId, MessageRef)> {
        self.copies.lock().unwrap().clone()
    }

    fn check_chat(&self, chat: ChatId) -> Result<(), TransportError> {
        if self.failing_chats.lock().unwrap().contains(&chat) {
            return Err(TransportError::Other(format!("chat {} unreachable", chat)));
        }
        Ok(())
    }

    fn next_message(&self, chat: ChatId) -> MessageRef {
        MessageRef {
            chat,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        _markup: Markup,
    ) -> Result<MessageRef, TransportError> {
        self.check_chat(chat)?;
        self.texts.lock().unwrap().push((chat, text.to_string()));
        Ok(self.next_message(chat))
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        markup: Markup,
    ) -> Result<(), TransportError> {
        self.edits
            .lock()
            .unwrap()
            .push((message, text.to_string(), markup));
        Ok(())
    }

    async fn send_file(
        &self,
        chat: ChatId,
        upload: Upload,
        _progress: Option<UploadProgress<'_>>,
    ) -> Result<SentFile, TransportError> {
        self.check_chat(chat)?;
        if self
            .rate_limits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::RateLimited(Duration::from_millis(1)));
        }

        let file_id = match &upload.source {
            FileSource::Cached(id) => {
                if *self.stale_handles.lock().unwrap() {
                    return Err(TransportError::Rejected {
                        kind: upload.kind,
                        reason: "file handle expired".into(),
                    });
                }
                id.clone()
            }
            FileSource::Path(path) => {
                if self.rejected_kinds.lock().unwrap().contains(&upload.kind) {
                    return Err(TransportError::Rejected {
                        kind: upload.kind,
                        reason: "unsupported dimensions".into(),
                    });
                }
                let size = tokio::fs::metadata(path).await.unwrap().len();
                self.uploaded_sizes.lock().unwrap().push(size);
                format!("file-{}", self.files.lock().unwrap().len() + 1)
            }
        };

        self.files.lock().unwrap().push((chat, upload));
        Ok(SentFile {
            message: self.next_message(chat),
            file_id: Some(file_id),
        })
    }

    async fn copy_message(
        &self,
        to: ChatId,
        from: MessageRef,
        _caption: Option<&str>,
    ) -> Result<MessageRef, TransportError> {
        self.check_chat(to)?;
        self.copies.lock().unwrap().push((to, from));
        Ok(self.next_message(to))
    }
}

/// One scripted fetch outcome
#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// Write a file of this many bytes
    Produce(&'static str, usize),
    /// Like `Produce`, after a short pause
    Slow(&'static str, usize),
    /// Succeed without output
    Empty,
    /// Extractor could not understand the page
    Extraction,
    /// Content removed
    Unavailable,
    /// Advertise this total before writing
    Oversized(u64),
    /// Connection lost after this many bytes
    Network { bytes_written: u64 },
    /// Block until the transfer is cancelled
    WaitForCancel,
}

/// Arguments a scripted fetcher was called with
#[derive(Clone, Debug)]
pub(crate) struct FetchCall {
    pub(crate) format: Option<String>,
    pub(crate) output_dir: PathBuf,
    pub(crate) resume_from: Option<PathBuf>,
}

/// Fetcher replaying a fixed list of outcomes, one per call
pub(crate) struct ScriptedFetcher {
    kind: StrategyKind,
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<FetchCall>>,
}

impl ScriptedFetcher {
    pub(crate) fn new(kind: StrategyKind, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<Vec<PathBuf>, FetchError> {
        self.calls.lock().unwrap().push(FetchCall {
            format: job.format.map(str::to_string),
            output_dir: job.output_dir.to_path_buf(),
            resume_from: job.resume_from.map(Path::to_path_buf),
        });
        let step = self.steps.lock().unwrap().pop_front();

        match step {
            None => Err(FetchError::content("script exhausted")),
            Some(Step::Produce(name, len)) => produce(job, name, len).await,
            Some(Step::Slow(name, len)) => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                produce(job, name, len).await
            }
            Some(Step::Empty) => Ok(vec![]),
            Some(Step::Extraction) => Err(FetchError::Content {
                message: "Unable to extract video data".into(),
                extraction: true,
            }),
            Some(Step::Unavailable) => Err(FetchError::Unavailable("video removed".into())),
            Some(Step::Oversized(total)) => {
                job.observer.on_progress(0, Some(total))?;
                Ok(vec![])
            }
            Some(Step::Network { bytes_written: 0 }) => Err(FetchError::network("connection reset")),
            Some(Step::Network { bytes_written }) => {
                let partial = job.output_dir.join("download.part");
                tokio::fs::write(&partial, vec![7u8; bytes_written as usize]).await?;
                job.observer
                    .on_progress(bytes_written, Some(bytes_written * 2))?;
                Err(FetchError::Network {
                    message: "connection reset by peer".into(),
                    bytes_written,
                    total: Some(bytes_written * 2),
                    partial: Some(partial),
                })
            }
            Some(Step::WaitForCancel) => loop {
                if job.observer.is_cancelled() {
                    return Err(FetchError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            },
        }
    }
}

async fn produce(job: &FetchJob<'_>, name: &str, len: usize) -> Result<Vec<PathBuf>, FetchError> {
    job.observer.on_progress(0, Some(len as u64))?;
    let path = job.output_dir.join(name);
    tokio::fs::write(&path, vec![7u8; len]).await?;
    job.observer.on_progress(len as u64, Some(len as u64))?;
    Ok(vec![path])
}

/// Media tools with fixed probe results; cuts write bytes proportional to duration
pub(crate) struct FakeMediaTools {
    metadata: MediaMetadata,
    can_cut: bool,
}

impl FakeMediaTools {
    /// Probe returns `metadata`; cutting unavailable
    pub(crate) fn new(metadata: MediaMetadata) -> Arc<Self> {
        Arc::new(Self {
            metadata,
            can_cut: false,
        })
    }

    /// Probe returns `metadata`; cutting available
    pub(crate) fn cutting(metadata: MediaMetadata) -> Arc<Self> {
        Arc::new(Self {
            metadata,
            can_cut: true,
        })
    }
}

#[async_trait]
impl MediaTools for FakeMediaTools {
    async fn probe(&self, _path: &Path) -> crate::Result<MediaMetadata> {
        Ok(self.metadata.clone())
    }

    async fn cut(
        &self,
        source: &Path,
        _start_secs: f64,
        length_secs: f64,
        dest: &Path,
    ) -> crate::Result<()> {
        let size = tokio::fs::metadata(source).await?.len() as f64;
        let duration = self.metadata.duration_secs.unwrap_or(1.0);
        let len = (size * length_secs / duration) as usize;
        tokio::fs::write(dest, vec![1u8; len]).await?;
        Ok(())
    }

    fn can_cut(&self) -> bool {
        self.can_cut
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Updater reporting `before` until upgraded, then `after` (if any)
pub(crate) struct FakeUpdater {
    before: String,
    after: Option<String>,
    upgrades: AtomicUsize,
}

impl FakeUpdater {
    pub(crate) fn new(before: &str, after: Option<&str>) -> Self {
        Self {
            before: before.to_string(),
            after: after.map(str::to_string),
            upgrades: AtomicUsize::new(0),
        }
    }

    pub(crate) fn upgrades(&self) -> usize {
        self.upgrades.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractorUpdater for FakeUpdater {
    async fn version(&self) -> crate::Result<String> {
        match &self.after {
            Some(after) if self.upgrades() > 0 => Ok(after.clone()),
            _ => Ok(self.before.clone()),
        }
    }

    async fn upgrade(&self) -> crate::Result<()> {
        self.upgrades.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Config with fast retries, a quiet progress reporter and small limits
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.delivery.temp_dir = dir.join("temp");
    config.delivery.max_file_size = 1_000;
    config.delivery.hard_ceiling_multiple = 4;
    config.delivery.progress_interval = Duration::from_secs(3600);
    config.persistence.database_path = dir.join("media-dl.db");
    config.quota.free_daily = 5;
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    config
}

/// A downloader wired to in-memory doubles
pub(crate) struct Harness {
    pub(crate) downloader: MediaDownloader,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) transport: Arc<RecordingTransport>,
    pub(crate) updater: Arc<FakeUpdater>,
    next_message: AtomicI64,
    pub(crate) dir: tempfile::TempDir,
}

impl Harness {
    pub(crate) fn new(fetchers: Vec<Arc<ScriptedFetcher>>) -> Self {
        Self::build(fetchers, |_| {}, MediaMetadata::default(), FakeUpdater::new("1.0", None))
    }

    pub(crate) fn with_config(
        fetchers: Vec<Arc<ScriptedFetcher>>,
        configure: impl FnOnce(&mut Config),
    ) -> Self {
        Self::build(fetchers, configure, MediaMetadata::default(), FakeUpdater::new("1.0", None))
    }

    pub(crate) fn build(
        fetchers: Vec<Arc<ScriptedFetcher>>,
        configure: impl FnOnce(&mut Config),
        metadata: MediaMetadata,
        updater: FakeUpdater,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        configure(&mut config);

        let store = Arc::new(MemoryStore::new());
        let transport = RecordingTransport::new();
        let updater = Arc::new(updater);
        let registry = StrategyRegistry::new(config.extractor.extractor_fallback);
        let media: Arc<dyn MediaTools> = if metadata.duration_secs.is_some() {
            FakeMediaTools::cutting(metadata)
        } else {
            FakeMediaTools::new(metadata)
        };

        let downloader = MediaDownloader::with_components(
            config,
            Components {
                ledger: store.clone(),
                cache: store.clone(),
                settings: store.clone(),
                transport: transport.clone(),
                media,
                maintenance: Arc::new(ExtractorMaintenance::new(updater.clone())),
                registry,
                fetchers: fetchers
                    .into_iter()
                    .map(|f| f as Arc<dyn Fetcher>)
                    .collect(),
            },
        );

        Self {
            downloader,
            store,
            transport,
            updater,
            next_message: AtomicI64::new(1),
            dir,
        }
    }

    /// Create a user with the given balance
    pub(crate) fn seed(&self, id: i64, free: i64, paid: i64) {
        let mut record = QuotaRecord::new(UserId(id), free);
        record.paid = paid;
        self.store.insert_user(record);
    }

    pub(crate) async fn balance(&self, id: i64) -> (i64, i64) {
        let record = self.store.get_user(UserId(id)).await.unwrap().unwrap();
        (record.free, record.paid)
    }

    /// A request from `user` in their private chat, each with a fresh origin message
    pub(crate) fn request(&self, user: i64, url: &str) -> MediaRequest {
        let message_id = self.next_message.fetch_add(1, Ordering::SeqCst);
        MediaRequest::new(UserProfile::new(user), MessageRef::new(user, message_id), url)
    }

    /// Nothing is left in the working area
    pub(crate) fn temp_is_empty(&self) -> bool {
        let temp = self.downloader.config.temp_dir();
        match std::fs::read_dir(temp) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}

/// Count uploads per kind
pub(crate) fn kinds_sent(transport: &RecordingTransport) -> HashMap<MediaKind, usize> {
    let mut counts = HashMap::new();
    for (_, upload) in transport.files() {
        *counts.entry(upload.kind).or_insert(0) += 1;
    }
    counts
}
