use std::io::Write;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod app;
mod client;
mod config;
mod error;
mod handler;
mod logging;
mod state;
mod stream;
mod tui;
mod ui;

use app::App;
use client::ResumeClient;
use config::{Config, Overrides, Settings};
use state::{ChatState, SubmitRejection, UploadOutcome};
use stream::{ReplySink, STREAM_FAILED_MESSAGE};
use tui::{EventHandler, Tui};

#[derive(Parser)]
#[command(name = "resume-chat", version)]
#[command(about = "Upload a PDF resume and chat with an assistant about it")]
struct Cli {
    /// Backend origin serving /upload and /chat
    #[arg(long, env = "RESUME_CHAT_BACKEND", global = true)]
    backend: Option<String>,
    /// Animate replies one character at a time with this delay
    #[arg(long, global = true)]
    typewriter_ms: Option<u64>,
    /// Give up on a reply when the stream is silent this long
    #[arg(long, global = true)]
    idle_timeout_secs: Option<u64>,
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive terminal UI (default)
    Tui {
        /// PDF to pre-select in the upload box
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Upload a resume and print the backend's greeting
    Upload {
        file: PathBuf,
    },
    /// Ask one question and stream the answer to stdout
    Ask {
        question: String,
        /// Upload this resume first
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Check that the backend is reachable
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Tui { file: None });

    if matches!(command, Commands::Tui { .. }) {
        // The alternate screen owns the terminal, so logs go to a file
        if let Err(err) = logging::init_file() {
            eprintln!("Logging disabled: {}", err);
        }
    } else {
        logging::init_stderr();
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::get_config_path()?,
    };
    let config = Config::load_from(&config_path).unwrap_or_else(|err| {
        warn!(path = %config_path.display(), error = %err, "ignoring unreadable config");
        Config::new()
    });
    let overrides = Overrides {
        backend_url: cli.backend,
        typewriter_ms: cli.typewriter_ms,
        stream_idle_timeout_secs: cli.idle_timeout_secs,
    };
    let settings = Settings::resolve(config, overrides, config_path);
    info!(backend = %settings.backend_url, "settings loaded");

    match command {
        Commands::Tui { file } => run_tui(settings, file).await,
        Commands::Upload { file } => {
            let client = ResumeClient::new(&settings.backend_url);
            let mut state = ChatState::new();
            upload_file(&client, &settings, &mut state, file).await
        }
        Commands::Ask { question, file } => ask(settings, &question, file).await,
        Commands::Ping => ping(&settings).await,
    }
}

async fn run_tui(settings: Settings, file: Option<PathBuf>) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();

    let mut app = App::new(settings, file, events.sender());
    app.check_backend();

    let result = run_loop(&mut terminal, &mut app, &mut events).await;
    tui::restore()?;
    result
}

async fn run_loop(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}

/// Runs the upload through the same state transitions the TUI uses and
/// prints the resulting assistant message.
async fn upload_file(
    client: &ResumeClient,
    settings: &Settings,
    state: &mut ChatState,
    file: PathBuf,
) -> Result<()> {
    if !client::is_pdf(&file) {
        bail!("{} is not a .pdf file", file.display());
    }
    state.select_file(file);
    let Some(path) = state.begin_upload() else {
        bail!("no file selected");
    };

    let outcome = match client.upload(&path, settings.max_upload_bytes).await {
        Ok(greeting) => UploadOutcome::Accepted { greeting },
        Err(err) => {
            warn!(file = %path.display(), error = %err, "upload failed");
            UploadOutcome::Rejected
        }
    };
    let accepted = matches!(outcome, UploadOutcome::Accepted { .. });
    state.finish_upload(outcome);

    for message in state.messages() {
        println!("{}", message.content);
    }

    if !accepted {
        bail!("upload of {} failed", path.display());
    }
    if let Err(err) = Config::save_last_file(&settings.config_path, &path) {
        warn!(error = %err, "could not remember uploaded file");
    }
    Ok(())
}

/// Prints each new part of the reply as it arrives.
struct StdoutSink<'a> {
    state: &'a mut ChatState,
    printed: usize,
}

impl ReplySink for StdoutSink<'_> {
    fn started(&mut self) {
        self.state.reply_started();
    }

    fn snapshot(&mut self, text: &str) {
        self.state.reply_snapshot(text);
        if let Some(delta) = text.get(self.printed..) {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }
        self.printed = text.len();
    }

    fn failed(&mut self, message: &str) {
        self.state.reply_failed(Some(message));
    }
}

/// Starting state for `ask` without `--file`. The backend keeps its index
/// between runs, so a resume uploaded earlier from here is still usable.
fn resumed_state(last_file: Option<PathBuf>) -> Result<ChatState> {
    match last_file {
        Some(path) => Ok(ChatState::with_indexed_resume(path)),
        None => bail!("{}", SubmitRejection::NotUploaded),
    }
}

async fn ask(settings: Settings, question: &str, file: Option<PathBuf>) -> Result<()> {
    let client = ResumeClient::new(&settings.backend_url);

    let mut state = match file {
        Some(file) => {
            let mut state = ChatState::new();
            upload_file(&client, &settings, &mut state, file).await?;
            println!();
            state
        }
        None => resumed_state(settings.last_file.clone())?,
    };

    let message = match state.submit(question, settings.max_message_chars) {
        Ok(message) => message,
        Err(rejection) => bail!("{}", rejection),
    };

    stream_answer(&client, &settings, &mut state, &message).await
}

/// Stream the reply to stdout. A failure is reported once, through the
/// returned error.
async fn stream_answer(
    client: &ResumeClient,
    settings: &Settings,
    state: &mut ChatState,
    message: &str,
) -> Result<()> {
    let mut sink = StdoutSink { state: &mut *state, printed: 0 };
    let result = client.chat(message, settings.stream_options(), &mut sink).await;
    if sink.printed > 0 {
        println!();
    }

    match result {
        Ok(_) => {
            state.reply_finished();
            Ok(())
        }
        Err(err) => {
            warn!(error = %err, "chat failed");
            bail!("{}", STREAM_FAILED_MESSAGE)
        }
    }
}

async fn ping(settings: &Settings) -> Result<()> {
    let client = ResumeClient::new(&settings.backend_url);
    match client.ping().await {
        Ok(message) => {
            println!("{} is up: {}", client.base_url(), message);
            Ok(())
        }
        Err(err) => bail!("{} is unreachable: {}", client.base_url(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatMessage;

    #[test]
    fn test_ask_without_any_upload_is_refused() {
        let err = resumed_state(None).unwrap_err();
        assert_eq!(err.to_string(), "Upload a resume first");
    }

    #[test]
    fn test_ask_reuses_last_uploaded_file() {
        let state = resumed_state(Some(PathBuf::from("/home/me/cv.pdf"))).unwrap();
        assert!(state.input_enabled());
        assert_eq!(state.upload().file(), Some(std::path::Path::new("/home/me/cv.pdf")));
    }

    #[tokio::test]
    async fn test_failed_answer_reports_literal_once() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::resolve(
            Config::new(),
            Overrides {
                backend_url: Some("http://127.0.0.1:9".to_string()),
                ..Overrides::default()
            },
            dir.path().join("config.json"),
        );
        let client = ResumeClient::new(&settings.backend_url);
        let mut state = ChatState::with_indexed_resume("cv.pdf");
        let message = state.submit("hi", settings.max_message_chars).unwrap();

        let err = stream_answer(&client, &settings, &mut state, &message)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), STREAM_FAILED_MESSAGE);
        assert_eq!(
            state.messages().last(),
            Some(&ChatMessage::assistant(STREAM_FAILED_MESSAGE))
        );
        assert!(!state.is_streaming());
    }
}
