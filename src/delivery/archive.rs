//! Best-effort copies to the archival chat.
//!
//! Nothing here can fail a request: each copy runs on its own task, and errors are
//! logged and broadcast as [`Event::ArchiveFailed`].

use super::MediaDownloader;
use crate::error::{Error, UserNotice};
use crate::transport::Markup;
use crate::types::{ChatId, Event, MessageRef, UserProfile};

fn archive_header(user: &UserProfile, url: &str) -> String {
    let name = user.first_name.as_deref().unwrap_or("unknown");
    let handle = user
        .username
        .as_deref()
        .map(|u| format!(" @{}", u))
        .unwrap_or_default();
    format!("#id{} {}{}\n{}", user.id, name, handle, url)
}

impl MediaDownloader {
    fn archive_chat(&self) -> Option<ChatId> {
        self.config.delivery.archive_chat.map(ChatId)
    }

    /// Copy delivered messages to the archival chat, behind a header naming the user
    pub(crate) fn archive_delivery(&self, user: &UserProfile, url: &str, messages: &[MessageRef]) {
        let Some(chat) = self.archive_chat() else {
            return;
        };
        let header = archive_header(user, url);
        let messages = messages.to_vec();
        let downloader = self.clone();

        tokio::spawn(async move {
            if let Err(e) = downloader
                .transport
                .send_message(chat, &header, Markup::None)
                .await
            {
                downloader.archive_failed(e.to_string());
                return;
            }
            for message in messages {
                if let Err(e) = downloader.transport.copy_message(chat, message, None).await {
                    downloader.archive_failed(e.to_string());
                }
            }
        });
    }

    /// Post a failure diagnostic to the archival chat
    pub(crate) fn archive_failure(&self, user: &UserProfile, url: &str, error: &Error) {
        let Some(chat) = self.archive_chat() else {
            return;
        };
        let notice = UserNotice::from(error);
        let details = notice
            .details
            .as_ref()
            .map(|d| format!("\n{}", d))
            .unwrap_or_default();
        let text = format!(
            "{}\nFailed [{}]: {}{}",
            archive_header(user, url),
            notice.code,
            error,
            details
        );
        let downloader = self.clone();

        tokio::spawn(async move {
            if let Err(e) = downloader
                .transport
                .send_message(chat, &text, Markup::None)
                .await
            {
                downloader.archive_failed(e.to_string());
            }
        });
    }

    fn archive_failed(&self, error: String) {
        tracing::warn!(error = %error, "Archive copy failed");
        self.emit_event(Event::ArchiveFailed { error });
    }
}
