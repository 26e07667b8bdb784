//! In-memory chat transport that records every call

use async_trait::async_trait;
use media_dl::transport::UploadProgress;
use media_dl::{ChatId, ChatTransport, FileSource, Markup, MessageRef, SentFile, TransportError, Upload};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

/// Chat transport keeping texts, edits and uploads for inspection
pub struct FakeChat {
    next_id: AtomicI64,
    texts: Mutex<Vec<(ChatId, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    files: Mutex<Vec<(ChatId, Upload)>>,
    sizes: Mutex<Vec<u64>>,
}

impl Default for FakeChat {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(1_000),
            texts: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            sizes: Mutex::new(Vec::new()),
        }
    }
}

impl FakeChat {
    /// Text messages sent so far
    pub fn texts(&self) -> Vec<(ChatId, String)> {
        self.texts.lock().unwrap().clone()
    }

    /// Text of the most recent status edit
    pub fn last_edit(&self) -> Option<String> {
        self.edits.lock().unwrap().last().map(|(_, text)| text.clone())
    }

    /// Uploads sent so far
    pub fn files(&self) -> Vec<(ChatId, Upload)> {
        self.files.lock().unwrap().clone()
    }

    /// Size of every path upload when it was sent
    pub fn uploaded_sizes(&self) -> Vec<u64> {
        self.sizes.lock().unwrap().clone()
    }

    fn next(&self, chat: ChatId) -> MessageRef {
        MessageRef {
            chat,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        _markup: Markup,
    ) -> Result<MessageRef, TransportError> {
        self.texts.lock().unwrap().push((chat, text.to_string()));
        Ok(self.next(chat))
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        _markup: Markup,
    ) -> Result<(), TransportError> {
        self.edits.lock().unwrap().push((message, text.to_string()));
        Ok(())
    }

    async fn send_file(
        &self,
        chat: ChatId,
        upload: Upload,
        _progress: Option<UploadProgress<'_>>,
    ) -> Result<SentFile, TransportError> {
        let file_id = match &upload.source {
            FileSource::Cached(id) => id.clone(),
            FileSource::Path(path) => {
                let len = std::fs::metadata(path)
                    .map_err(|e| TransportError::Other(e.to_string()))?
                    .len();
                self.sizes.lock().unwrap().push(len);
                format!("uploaded-{}-{}", self.files.lock().unwrap().len(), len)
            }
        };
        self.files.lock().unwrap().push((chat, upload));
        Ok(SentFile {
            message: self.next(chat),
            file_id: Some(file_id),
        })
    }

    async fn copy_message(
        &self,
        to: ChatId,
        _from: MessageRef,
        _caption: Option<&str>,
    ) -> Result<MessageRef, TransportError> {
        Ok(self.next(to))
    }
}
