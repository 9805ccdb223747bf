use std::path::{Path, PathBuf};

use ratatui::layout::Rect;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::{is_pdf, ResumeClient};
use crate::config::{Config, Settings};
use crate::state::{ChatState, SubmitRejection, UploadOutcome};
use crate::stream::ReplySink;
use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    FileInput,
    ChatInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Unknown,
    Online,
    Offline,
}

/// Results of background network work, delivered through the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Status(BackendStatus),
    Upload(UploadOutcome),
    ReplyStarted,
    ReplySnapshot(String),
    ReplyFailed(String),
    ReplyDone,
}

/// Forwards reply progress to the event loop.
struct ChannelSink {
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl ChannelSink {
    fn send(&self, event: BackendEvent) {
        // The loop is gone when the app is quitting; nothing left to update.
        let _ = self.tx.send(AppEvent::Backend(event));
    }
}

impl ReplySink for ChannelSink {
    fn started(&mut self) {
        self.send(BackendEvent::ReplyStarted);
    }

    fn snapshot(&mut self, text: &str) {
        self.send(BackendEvent::ReplySnapshot(text.to_string()));
    }

    fn failed(&mut self, message: &str) {
        self.send(BackendEvent::ReplyFailed(message.to_string()));
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // Upload panel
    pub file_input: String,
    pub file_cursor: usize, // cursor position in file_input (chars)

    // Chat input
    pub chat_input: String,
    pub chat_cursor: usize, // cursor position in chat_input (chars)

    // Conversation
    pub chat: ChatState,
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of transcript area for scroll calculations
    pub chat_width: u16,  // Width of transcript area for wrap calculations
    pub follow_tail: bool,

    // Transient status line text
    pub notice: Option<String>,
    pub backend_status: BackendStatus,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Panel areas for mouse hit-testing (updated during render)
    pub chat_area: Option<Rect>,

    pub client: ResumeClient,
    pub settings: Settings,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        settings: Settings,
        preselect: Option<PathBuf>,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let client = ResumeClient::new(&settings.backend_url);

        let mut app = Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            focus: FocusPane::FileInput,

            file_input: String::new(),
            file_cursor: 0,

            chat_input: String::new(),
            chat_cursor: 0,

            chat: ChatState::new(),
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_tail: true,

            notice: None,
            backend_status: BackendStatus::Unknown,

            animation_frame: 0,

            chat_area: None,

            client,
            settings,
            events,
        };

        // An explicit file wins; otherwise offer the last one that uploaded
        let initial = preselect.or_else(|| {
            app.settings
                .last_file
                .clone()
                .filter(|path| path.is_file())
        });
        if let Some(path) = initial {
            app.set_file_input(&path.to_string_lossy());
            app.choose_file();
        }

        app
    }

    /// Probe the backend in the background.
    pub fn check_backend(&self) {
        let client = self.client.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let status = match client.ping().await {
                Ok(message) => {
                    info!(%message, "backend reachable");
                    BackendStatus::Online
                }
                Err(err) => {
                    warn!(error = %err, "backend unreachable");
                    BackendStatus::Offline
                }
            };
            let _ = tx.send(AppEvent::Backend(BackendEvent::Status(status)));
        });
    }

    pub fn set_file_input(&mut self, text: &str) {
        self.file_input = clean_dropped_path(text);
        self.file_cursor = self.file_input.chars().count();
    }

    /// Validate the path in the upload box and hold it as the selected file.
    pub fn choose_file(&mut self) -> bool {
        let path = PathBuf::from(clean_dropped_path(&self.file_input));
        if path.as_os_str().is_empty() {
            self.notice = Some("Type or drop the path of a PDF resume".to_string());
            return false;
        }
        if !is_pdf(&path) {
            self.notice = Some("Only .pdf files can be uploaded".to_string());
            return false;
        }
        if !path.is_file() {
            self.notice = Some(format!("File not found: {}", path.display()));
            return false;
        }

        if self.chat.select_file(path) {
            self.notice = None;
            true
        } else {
            false
        }
    }

    /// Select the typed file if it changed, then upload the selection.
    pub fn start_upload(&mut self) {
        let typed = PathBuf::from(clean_dropped_path(&self.file_input));
        let selected = self.chat.upload().file().map(Path::to_path_buf);
        if !typed.as_os_str().is_empty() && selected.as_ref() != Some(&typed) && !self.choose_file() {
            return;
        }

        if !self.chat.upload().has_file() {
            self.notice = Some("Select a PDF resume first".to_string());
            return;
        }
        let Some(path) = self.chat.begin_upload() else {
            return;
        };
        self.notice = None;

        let client = self.client.clone();
        let max_bytes = self.settings.max_upload_bytes;
        let tx = self.events.clone();
        tokio::spawn(async move {
            let outcome = match client.upload(&path, max_bytes).await {
                Ok(greeting) => {
                    info!(file = %path.display(), "resume indexed");
                    UploadOutcome::Accepted { greeting }
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "upload failed");
                    UploadOutcome::Rejected
                }
            };
            let _ = tx.send(AppEvent::Backend(BackendEvent::Upload(outcome)));
        });
    }

    /// Send the chat input if the conversation allows it.
    pub fn submit_chat(&mut self) {
        let text = match self.chat.submit(&self.chat_input, self.settings.max_message_chars) {
            Ok(text) => text,
            Err(SubmitRejection::Empty | SubmitRejection::Streaming) => return,
            Err(rejection) => {
                self.notice = Some(rejection.to_string());
                return;
            }
        };

        self.chat_input.clear();
        self.chat_cursor = 0;
        self.notice = None;
        self.scroll_chat_to_bottom();

        let client = self.client.clone();
        let options = self.settings.stream_options();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let mut sink = ChannelSink { tx };
            if client.chat(&text, options, &mut sink).await.is_ok() {
                sink.send(BackendEvent::ReplyDone);
            }
        });
    }

    pub fn apply_backend(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Status(status) => self.backend_status = status,
            BackendEvent::Upload(outcome) => {
                let accepted = matches!(outcome, UploadOutcome::Accepted { .. });
                self.chat.finish_upload(outcome);
                if accepted {
                    self.backend_status = BackendStatus::Online;
                    if let Some(file) = self.chat.upload().file() {
                        if let Err(err) = Config::save_last_file(&self.settings.config_path, file) {
                            warn!(error = %err, "could not remember uploaded file");
                        }
                    }
                    self.focus = FocusPane::ChatInput;
                    self.input_mode = InputMode::Editing;
                }
                self.scroll_chat_to_bottom();
            }
            BackendEvent::ReplyStarted => {
                self.chat.reply_started();
                self.follow();
            }
            BackendEvent::ReplySnapshot(text) => {
                self.chat.reply_snapshot(&text);
                self.follow();
            }
            BackendEvent::ReplyFailed(message) => {
                self.chat.reply_failed(Some(&message));
                self.follow();
            }
            BackendEvent::ReplyDone => {
                self.chat.reply_finished();
                self.follow();
            }
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.chat.upload().uploading() || self.chat.is_streaming() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    fn follow(&mut self) {
        if self.follow_tail {
            self.scroll_chat_to_bottom();
        }
    }

    pub fn scroll_chat_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_tail = false;
    }

    pub fn scroll_chat_down(&mut self, lines: u16) {
        let max = self.max_chat_scroll();
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max);
        self.follow_tail = self.chat_scroll >= max;
    }

    /// Scroll the transcript so its last line is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        self.follow_tail = true;
        self.chat_scroll = self.max_chat_scroll();
    }

    fn max_chat_scroll(&self) -> u16 {
        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };
        self.transcript_lines().saturating_sub(visible_height)
    }

    fn transcript_lines(&self) -> u16 {
        // Use actual transcript width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for (index, msg) in self.chat.messages().iter().enumerate() {
            total_lines = total_lines.saturating_add(1); // Role line ("You:" or "Assistant:")
            for line in msg.content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 {
                    1
                } else {
                    char_count.div_ceil(wrap_width)
                };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            if self.chat.awaiting_reply(index) {
                total_lines = total_lines.saturating_add(1); // "Thinking..." placeholder
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }

        total_lines
    }
}

/// Dropped files arrive quoted, escaped or as `file://` URLs depending on the
/// terminal.
pub fn clean_dropped_path(text: &str) -> String {
    let trimmed = text.trim();
    let unquoted = trimmed
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .or_else(|| trimmed.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
        .unwrap_or(trimmed);
    let path = unquoted.strip_prefix("file://").unwrap_or(unquoted);
    path.replace("\\ ", " ").replace("%20", " ")
}
