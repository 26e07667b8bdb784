//! Chat transport seam.
//!
//! The library never talks to a chat platform directly. The embedding application
//! implements [`ChatTransport`] for its bot API and hands it to the downloader.

use crate::types::{ChatId, MediaKind, MediaMetadata, MessageRef, ResumeToken, TransferId};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors a transport may report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The edit would not change the visible message
    #[error("message is not modified")]
    NotModified,

    /// The platform asked the client to slow down
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    /// The platform refused the file as the requested kind
    #[error("upload rejected as {kind:?}: {reason}")]
    Rejected {
        /// Kind the upload was attempted as
        kind: MediaKind,
        /// Reason given by the platform
        reason: String,
    },

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether waiting and retrying may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::RateLimited(_))
    }
}

/// Inline control attached to a status message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Markup {
    /// No controls
    None,
    /// A cancel button for the running transfer
    Cancel(TransferId),
    /// A resume button for an interrupted transfer
    Resume(ResumeToken),
}

/// Where the bytes of an upload come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// A local file
    Path(PathBuf),
    /// A file already stored by the platform (from the result cache)
    Cached(String),
}

/// One file to send
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    /// How the platform should present the file
    pub kind: MediaKind,
    /// File bytes or platform handle
    pub source: FileSource,
    /// Caption, attached to one designated part only
    pub caption: Option<String>,
    /// Dimensions and duration for media kinds
    pub metadata: MediaMetadata,
}

/// Handle of a sent file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFile {
    /// Message that carries the file
    pub message: MessageRef,
    /// Platform file handle, reused on cache hits
    pub file_id: Option<String>,
}

/// Upload progress callback: (bytes sent, total bytes)
pub type UploadProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Capabilities the downloader needs from the chat platform
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text message
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        markup: Markup,
    ) -> Result<MessageRef, TransportError>;

    /// Replace the text of an existing message
    ///
    /// Must return [`TransportError::NotModified`] when nothing visible changes.
    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        markup: Markup,
    ) -> Result<(), TransportError>;

    /// Send one file
    async fn send_file(
        &self,
        chat: ChatId,
        upload: Upload,
        progress: Option<UploadProgress<'_>>,
    ) -> Result<SentFile, TransportError>;

    /// Copy an existing message into another chat, optionally replacing its caption
    async fn copy_message(
        &self,
        to: ChatId,
        from: MessageRef,
        caption: Option<&str>,
    ) -> Result<MessageRef, TransportError>;
}

/// Edit a message, swallowing "not modified" and logging anything else
///
/// Progress and status edits are cosmetic; they never fail a transfer.
pub async fn edit_quietly(
    transport: &dyn ChatTransport,
    message: MessageRef,
    text: &str,
    markup: Markup,
) {
    match transport.edit_message(message, text, markup).await {
        Ok(()) | Err(TransportError::NotModified) => {}
        Err(e) => {
            tracing::warn!(chat = message.chat.0, message_id = message.message_id, error = %e, "Failed to edit status message");
        }
    }
}
