//! UI-agnostic conversation state.
//!
//! `ChatState` is the single owner of the message log and the two progress
//! gates (upload stage and streaming flag). Front ends call its operations in
//! response to user input and completed network steps; the operations refuse
//! anything the current stage does not allow.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::stream::STREAM_FAILED_MESSAGE;

pub const DEFAULT_GREETING: &str = "✅ Resume uploaded! Ask me anything about it.";
pub const UPLOAD_FAILED_MESSAGE: &str = "❌ Upload failed. Please try again.";

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Where the resume is in its trip to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UploadState {
    #[default]
    NoFile,
    FileSelected(PathBuf),
    Uploading(PathBuf),
    Uploaded(PathBuf),
}

impl UploadState {
    pub fn has_file(&self) -> bool {
        !matches!(self, UploadState::NoFile)
    }

    pub fn uploading(&self) -> bool {
        matches!(self, UploadState::Uploading(_))
    }

    pub fn uploaded(&self) -> bool {
        matches!(self, UploadState::Uploaded(_))
    }

    pub fn file(&self) -> Option<&Path> {
        match self {
            UploadState::NoFile => None,
            UploadState::FileSelected(path)
            | UploadState::Uploading(path)
            | UploadState::Uploaded(path) => Some(path),
        }
    }
}

/// Result of a finished upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Backend indexed the file; it may supply its own greeting.
    Accepted { greeting: Option<String> },
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    NotUploaded,
    Empty,
    Streaming,
    TooLong { limit: usize },
}

impl std::fmt::Display for SubmitRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitRejection::NotUploaded => write!(f, "Upload a resume first"),
            SubmitRejection::Empty => write!(f, "Type a question first"),
            SubmitRejection::Streaming => write!(f, "Wait for the current reply to finish"),
            SubmitRejection::TooLong { limit } => {
                write!(f, "Message is longer than {} characters", limit)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ChatState {
    messages: Vec<ChatMessage>,
    upload: UploadState,
    streaming: bool,
    /// Index of the assistant message the current stream writes into.
    reply_slot: Option<usize>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a backend that already holds an indexed resume.
    pub fn with_indexed_resume(path: impl Into<PathBuf>) -> Self {
        Self {
            upload: UploadState::Uploaded(path.into()),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn upload(&self) -> &UploadState {
        &self.upload
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Whether message `index` is the open reply and has no text yet.
    pub fn awaiting_reply(&self, index: usize) -> bool {
        self.streaming
            && self.reply_slot == Some(index)
            && self.messages.get(index).is_some_and(|m| m.content.is_empty())
    }

    /// Whether the chat input accepts text.
    pub fn input_enabled(&self) -> bool {
        self.upload.uploaded() && !self.streaming
    }

    /// Hold a new file. Ignored once an upload is running or done.
    pub fn select_file(&mut self, path: PathBuf) -> bool {
        match self.upload {
            UploadState::NoFile | UploadState::FileSelected(_) => {
                self.upload = UploadState::FileSelected(path);
                true
            }
            UploadState::Uploading(_) | UploadState::Uploaded(_) => false,
        }
    }

    /// Move the selected file to `Uploading` and hand back its path. `None`
    /// when there is no file or an upload already ran.
    pub fn begin_upload(&mut self) -> Option<PathBuf> {
        let UploadState::FileSelected(path) = &self.upload else {
            return None;
        };
        let path = path.clone();
        self.upload = UploadState::Uploading(path.clone());
        Some(path)
    }

    /// Record the upload outcome. The log is replaced by a single assistant
    /// message: the greeting on success, the failure literal otherwise.
    pub fn finish_upload(&mut self, outcome: UploadOutcome) {
        if !self.upload.uploading() {
            return;
        }
        let UploadState::Uploading(path) = std::mem::take(&mut self.upload) else {
            return;
        };

        match outcome {
            UploadOutcome::Accepted { greeting } => {
                let greeting = greeting
                    .filter(|g| !g.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_GREETING.to_string());
                self.upload = UploadState::Uploaded(path);
                self.messages = vec![ChatMessage::assistant(greeting)];
            }
            UploadOutcome::Rejected => {
                self.upload = UploadState::FileSelected(path);
                self.messages = vec![ChatMessage::assistant(UPLOAD_FAILED_MESSAGE)];
            }
        }
        self.reply_slot = None;
    }

    /// Accept a question for sending. On success the trimmed text is logged
    /// as a user message, the streaming flag is raised and the text returned.
    pub fn submit(&mut self, input: &str, max_chars: usize) -> Result<String, SubmitRejection> {
        if !self.upload.uploaded() {
            return Err(SubmitRejection::NotUploaded);
        }
        if self.streaming {
            return Err(SubmitRejection::Streaming);
        }
        let text = input.trim();
        if text.is_empty() {
            return Err(SubmitRejection::Empty);
        }
        if text.chars().count() > max_chars {
            return Err(SubmitRejection::TooLong { limit: max_chars });
        }

        self.messages.push(ChatMessage::user(text));
        self.streaming = true;
        Ok(text.to_string())
    }

    /// The reply body started; open an empty assistant message for it.
    pub fn reply_started(&mut self) {
        if !self.streaming || self.reply_slot.is_some() {
            return;
        }
        self.messages.push(ChatMessage::assistant(String::new()));
        self.reply_slot = Some(self.messages.len() - 1);
    }

    /// Replace the in-progress reply with a longer snapshot.
    pub fn reply_snapshot(&mut self, text: &str) {
        let Some(slot) = self.reply_slot else {
            return;
        };
        if let Some(message) = self.messages.get_mut(slot) {
            if text.len() >= message.content.len() {
                message.content.clear();
                message.content.push_str(text);
            }
        }
    }

    /// Close the turn. A reply slot that never received text is removed.
    pub fn reply_finished(&mut self) {
        if let Some(slot) = self.reply_slot.take() {
            if self.messages.get(slot).is_some_and(|m| m.content.is_empty()) {
                self.messages.remove(slot);
            }
        }
        self.streaming = false;
    }

    /// The request or stream failed: append the failure message and reopen
    /// the input. Text already streamed stays in place.
    pub fn reply_failed(&mut self, message: Option<&str>) {
        self.reply_finished();
        self.messages
            .push(ChatMessage::assistant(message.unwrap_or(STREAM_FAILED_MESSAGE)));
    }
}
