//! Attachment ingestion.
//!
//! Every attachment on a user turn is classified before any model call:
//! images become image content parts, text-bearing documents are extracted
//! and appended to the user text, and formats the model cannot consume
//! short-circuit the whole turn with a canned acknowledgement.

use base64::Engine as _;
use tracing::debug;

use crate::collab::AttachmentFetcher;
use crate::error::{CollabError, Result};
use crate::llm::ChatMessage;

/// One user-attached file, by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    /// Content type as reported by the upload, if any.
    pub media_type: Option<String>,
}

/// What ingestion produced for a turn.
#[derive(Debug)]
pub enum Ingested {
    /// A user message carrying the text plus any image parts.
    Message(ChatMessage),
    /// At least one attachment cannot be consumed by a model; the turn
    /// short-circuits with this acknowledgement and no model call.
    Unsupported { ack: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Image,
    Text,
    Audio,
    Video,
    Archive,
    Executable,
}

fn classify(attachment: &Attachment) -> Kind {
    let media = attachment.media_type.as_deref().unwrap_or("").to_lowercase();
    if media.starts_with("image/") {
        return Kind::Image;
    }
    if media.starts_with("audio/") {
        return Kind::Audio;
    }
    if media.starts_with("video/") {
        return Kind::Video;
    }

    let ext = attachment
        .name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" => Kind::Image,
        "mp3" | "wav" | "m4a" | "ogg" | "flac" => Kind::Audio,
        "mp4" | "mov" | "avi" | "mkv" | "webm" => Kind::Video,
        "zip" | "tar" | "gz" | "rar" | "7z" => Kind::Archive,
        "exe" | "dll" | "so" | "bin" | "msi" => Kind::Executable,
        // pdf, txt, csv, md, json, code files and anything unknown all go
        // through text extraction.
        _ => Kind::Text,
    }
}

fn image_media_type(attachment: &Attachment) -> String {
    if let Some(media) = attachment.media_type.as_deref() {
        if media.starts_with("image/") {
            return media.to_string();
        }
    }
    let ext = attachment
        .name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "gif" => "image/gif".to_string(),
        "webp" => "image/webp".to_string(),
        _ => "image/png".to_string(),
    }
}

fn unsupported_ack(attachment: &Attachment, kind: Kind) -> String {
    let offer = match kind {
        Kind::Audio => " If you need its contents, I can work with a transcript of the audio.",
        Kind::Video => " If you need its contents, I can work with a transcript or key frames.",
        Kind::Archive => " If you extract it and attach individual files, I can read those.",
        _ => "",
    };
    format!(
        "I received {name} but can't process this file type yet. It stays available at {url}.{offer}",
        name = attachment.name,
        url = attachment.url,
        offer = offer
    )
}

/// Extract displayable text from fetched bytes. Binary residue (as found
/// in PDFs) is filtered down to printable characters; hosts that need
/// faithful PDF extraction front this with a converter on the fetch path.
fn extract_text(bytes: &[u8]) -> String {
    let raw = String::from_utf8_lossy(bytes);
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn cap_text(text: String, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text;
    }
    let truncated: String = text.chars().take(cap).collect();
    format!("{}\n[... truncated ...]", truncated)
}

/// Build the user message for a turn from its text and attachments.
///
/// Fetches run sequentially; a fetch failure aborts the turn rather than
/// silently sending a partial message.
pub async fn ingest(
    fetcher: &dyn AttachmentFetcher,
    user_text: &str,
    attachments: &[Attachment],
    text_cap: usize,
) -> Result<Ingested> {
    // Unsupported formats veto the turn before any bytes move.
    for attachment in attachments {
        let kind = classify(attachment);
        if matches!(kind, Kind::Audio | Kind::Video | Kind::Archive | Kind::Executable) {
            debug!(name = %attachment.name, ?kind, "unsupported attachment short-circuits turn");
            return Ok(Ingested::Unsupported {
                ack: unsupported_ack(attachment, kind),
            });
        }
    }

    let mut message = ChatMessage::user(user_text);
    for attachment in attachments {
        let fetched = fetcher
            .fetch(&attachment.url)
            .await
            .map_err(|err| CollabError::Fetch(format!("{}: {}", attachment.name, err)))?;
        match classify(attachment) {
            Kind::Image => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&fetched.bytes);
                message.push_image(image_media_type(attachment), encoded);
            }
            _ => {
                let text = cap_text(extract_text(&fetched.bytes), text_cap);
                message.push_text(format!("--- {} ---\n{}", attachment.name, text));
            }
        }
    }
    Ok(Ingested::Message(message))
}
