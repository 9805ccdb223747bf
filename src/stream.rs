//! Reassembly of the chat endpoint's `data: ` framed reply stream.
//!
//! The backend writes one `data: <fragment>` line per generated token chunk
//! and closes the body when the reply is complete. Physical chunks from the
//! HTTP body do not line up with those lines, so bytes are held in a pending
//! buffer until a full line is available and only then decoded.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

pub const DATA_PREFIX: &str = "data: ";

/// Shown in place of the reply when the chat request or its stream fails.
pub const STREAM_FAILED_MESSAGE: &str = "⚠️ Failed to fetch response.";

/// How reply snapshots are released to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// One snapshot per received fragment.
    #[default]
    Off,
    /// One snapshot per character, sleeping between characters.
    Typewriter(Duration),
}

impl Pacing {
    pub fn from_millis(millis: Option<u64>) -> Self {
        match millis {
            Some(ms) if ms > 0 => Pacing::Typewriter(Duration::from_millis(ms)),
            _ => Pacing::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    pub pacing: Pacing,
    /// Fail the stream when no chunk arrives within this window.
    pub idle_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Streaming,
    Done,
    Failed,
}

/// Receives the growing reply as it is assembled.
pub trait ReplySink {
    /// The response body is about to be read.
    fn started(&mut self) {}

    /// Full reply text so far. Each call carries at least the previous text.
    fn snapshot(&mut self, text: &str);

    /// Terminal failure; no further snapshots follow.
    fn failed(&mut self, message: &str);
}

/// Splits raw bytes into non-empty lines, keeping any unterminated tail.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = decode_line(&raw[..pos]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Drain whatever was left without a trailing line feed.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        decode_line(&raw)
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(raw).into_owned())
}

/// Returns the reply fragment carried by a data line.
pub fn data_fragment(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX)
}

/// Accumulates the fragments of one assistant turn.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    lines: LineBuffer,
    accumulator: String,
    phase: StreamPhase,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn value(&self) -> &str {
        &self.accumulator
    }

    pub fn into_value(self) -> String {
        self.accumulator
    }

    /// Feed one physical chunk and return the fragments it completed, in
    /// order. The fragments are already part of [`value`](Self::value).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        match self.phase {
            StreamPhase::Done | StreamPhase::Failed => return Vec::new(),
            StreamPhase::Idle => self.phase = StreamPhase::Streaming,
            StreamPhase::Streaming => {}
        }

        let fragments: Vec<String> = self
            .lines
            .push(chunk)
            .iter()
            .filter_map(|line| data_fragment(line))
            .filter(|fragment| !fragment.is_empty())
            .map(str::to_owned)
            .collect();

        for fragment in &fragments {
            self.accumulator.push_str(fragment);
        }
        fragments
    }

    /// End of input. An unterminated trailing data line still counts; any
    /// other trailing text is dropped.
    pub fn finish(&mut self) -> Option<String> {
        if matches!(self.phase, StreamPhase::Done | StreamPhase::Failed) {
            return None;
        }
        self.phase = StreamPhase::Done;

        let tail = self.lines.finish()?;
        let fragment = data_fragment(&tail).filter(|f| !f.is_empty())?;
        self.accumulator.push_str(fragment);
        Some(fragment.to_owned())
    }

    pub fn fail(&mut self) {
        self.phase = StreamPhase::Failed;
        self.lines = LineBuffer::default();
    }
}

/// Drive a response body to completion, reporting every step to `sink`.
///
/// Returns the complete reply. On a transport error or idle timeout the sink
/// receives [`STREAM_FAILED_MESSAGE`] and the error is returned; text already
/// delivered stays delivered.
pub async fn reassemble<S, B, E>(
    body: S,
    options: StreamOptions,
    sink: &mut impl ReplySink,
) -> Result<String>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    futures_util::pin_mut!(body);

    let mut reassembler = StreamReassembler::new();
    let mut shown = String::new();
    let mut chunks = 0usize;

    sink.started();

    loop {
        let next = match options.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    reassembler.fail();
                    warn!(timeout_ms = limit.as_millis() as u64, "reply stream went idle");
                    sink.failed(STREAM_FAILED_MESSAGE);
                    return Err(ClientError::IdleTimeout(limit));
                }
            },
            None => body.next().await,
        };

        match next {
            Some(Ok(chunk)) => {
                chunks += 1;
                for fragment in reassembler.push(chunk.as_ref()) {
                    emit(&fragment, &mut shown, options.pacing, sink).await;
                }
            }
            Some(Err(err)) => {
                reassembler.fail();
                warn!(error = %err, chunks, "reply stream broke off");
                sink.failed(STREAM_FAILED_MESSAGE);
                return Err(ClientError::Transport(err.to_string()));
            }
            None => break,
        }
    }

    if let Some(fragment) = reassembler.finish() {
        emit(&fragment, &mut shown, options.pacing, sink).await;
    }

    debug!(
        chunks,
        phase = ?reassembler.phase(),
        chars = reassembler.value().chars().count(),
        "reply stream complete"
    );
    Ok(reassembler.into_value())
}

async fn emit(fragment: &str, shown: &mut String, pacing: Pacing, sink: &mut impl ReplySink) {
    match pacing {
        Pacing::Off => {
            shown.push_str(fragment);
            sink.snapshot(shown);
        }
        Pacing::Typewriter(delay) => {
            for c in fragment.chars() {
                shown.push(c);
                sink.snapshot(shown);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::io;

    #[derive(Default)]
    struct Recorder {
        started: bool,
        snapshots: Vec<String>,
        failure: Option<String>,
    }

    impl ReplySink for Recorder {
        fn started(&mut self) {
            self.started = true;
        }

        fn snapshot(&mut self, text: &str) {
            self.snapshots.push(text.to_string());
        }

        fn failed(&mut self, message: &str) {
            self.failure = Some(message.to_string());
        }
    }

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = std::result::Result<Vec<u8>, io::Error>> {
        stream::iter(parts.iter().map(|p| Ok(p.to_vec())).collect::<Vec<_>>())
    }

    async fn run(parts: &[&[u8]]) -> (String, Recorder) {
        let mut sink = Recorder::default();
        let value = reassemble(chunks(parts), StreamOptions::default(), &mut sink)
            .await
            .unwrap();
        (value, sink)
    }

    #[tokio::test]
    async fn test_fragments_across_chunks() {
        let (value, sink) = run(&[b"data: Hel\n", b"data: lo\n"]).await;
        assert_eq!(value, "Hello");
        assert!(sink.started);
        assert_eq!(sink.snapshots, vec!["Hel", "Hello"]);
        assert!(sink.failure.is_none());
    }

    #[tokio::test]
    async fn test_blank_line_between_data_lines() {
        let (value, _) = run(&[b"data: Hi\n\ndata: there\n"]).await;
        assert_eq!(value, "Hithere");
    }

    #[tokio::test]
    async fn test_server_framing_with_double_newlines() {
        let (value, sink) = run(&[b"data: I \n\ndata: led\n\n", b"data:  teams\n\n"]).await;
        assert_eq!(value, "I led teams");
        assert_eq!(sink.snapshots.len(), 3);
    }

    #[tokio::test]
    async fn test_non_data_lines_are_ignored() {
        let (value, _) = run(&[b"event: token\n: keepalive\ndata: ok\nid: 7\n"]).await;
        assert_eq!(value, "ok");
    }

    #[tokio::test]
    async fn test_line_split_mid_prefix() {
        let (value, _) = run(&[b"da", b"ta", b": Rust", b"acean\n"]).await;
        assert_eq!(value, "Rustacean");
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let bytes = "data: café ✅\n".as_bytes();
        // 'é' is two bytes, '✅' three; cut inside each.
        let e_start = "data: caf".len();
        let check_start = "data: café ".len();
        let (value, _) = run(&[
            &bytes[..e_start + 1],
            &bytes[e_start + 1..check_start + 1],
            &bytes[check_start + 1..check_start + 2],
            &bytes[check_start + 2..],
        ])
        .await;
        assert_eq!(value, "café ✅");
    }

    #[tokio::test]
    async fn test_any_two_way_split_gives_same_value() {
        let body = "data: Résumé\n\ndata:  mentions\n\ndata:  Rust 🦀\n\n".as_bytes();
        for cut in 0..=body.len() {
            let (value, _) = run(&[&body[..cut], &body[cut..]]).await;
            assert_eq!(value, "Résumé mentions Rust 🦀", "cut at {cut}");
        }
    }

    #[tokio::test]
    async fn test_byte_at_a_time() {
        let body = "data: one\ndata: two\n".as_bytes();
        let parts: Vec<&[u8]> = body.chunks(1).collect();
        let (value, sink) = run(&parts).await;
        assert_eq!(value, "onetwo");
        assert_eq!(sink.snapshots, vec!["one", "onetwo"]);
    }

    #[tokio::test]
    async fn test_snapshots_never_shrink() {
        let (_, sink) = run(&[b"data: a\ndata: bc\n", b"noise\n", b"data: def\n"]).await;
        for pair in sink.snapshots.windows(2) {
            assert!(pair[1].len() >= pair[0].len());
            assert!(pair[1].starts_with(pair[0].as_str()));
        }
    }

    #[tokio::test]
    async fn test_truncated_non_data_tail_is_dropped() {
        let (value, sink) = run(&[b"data: done\n", b"dat"]).await;
        assert_eq!(value, "done");
        assert_eq!(sink.snapshots, vec!["done"]);
    }

    #[tokio::test]
    async fn test_unterminated_data_tail_is_kept() {
        let (value, _) = run(&[b"data: a\n", b"data: b"]).await;
        assert_eq!(value, "ab");
    }

    #[tokio::test]
    async fn test_crlf_framing() {
        let (value, _) = run(&[b"data: x\r\n\r\ndata: y\r\n"]).await;
        assert_eq!(value, "xy");
    }

    #[tokio::test]
    async fn test_empty_stream_yields_empty_reply() {
        let (value, sink) = run(&[]).await;
        assert_eq!(value, "");
        assert!(sink.started);
        assert!(sink.snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_typewriter_pacing_keeps_final_value() {
        let mut sink = Recorder::default();
        let options = StreamOptions {
            pacing: Pacing::Typewriter(Duration::from_millis(1)),
            idle_timeout: None,
        };
        let value = reassemble(chunks(&["data: Hé\n".as_bytes(), b"data: y\n"]), options, &mut sink)
            .await
            .unwrap();
        assert_eq!(value, "Héy");
        assert_eq!(sink.snapshots, vec!["H", "Hé", "Héy"]);
    }

    #[tokio::test]
    async fn test_transport_error_fails_stream() {
        let body = stream::iter(vec![
            Ok(b"data: partial\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(b"data: never\n".to_vec()),
        ]);
        let mut sink = Recorder::default();
        let err = reassemble(body, StreamOptions::default(), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(sink.snapshots, vec!["partial"]);
        assert_eq!(sink.failure.as_deref(), Some(STREAM_FAILED_MESSAGE));
    }

    #[tokio::test]
    async fn test_idle_timeout_fails_stream() {
        let body = stream::iter(vec![Ok::<_, io::Error>(b"data: slow\n".to_vec())])
            .chain(stream::pending());
        let options = StreamOptions {
            pacing: Pacing::Off,
            idle_timeout: Some(Duration::from_millis(20)),
        };
        let mut sink = Recorder::default();
        let err = reassemble(body, options, &mut sink).await.unwrap_err();

        assert!(matches!(err, ClientError::IdleTimeout(_)));
        assert_eq!(sink.snapshots, vec!["slow"]);
        assert_eq!(sink.failure.as_deref(), Some(STREAM_FAILED_MESSAGE));
    }

    #[test]
    fn test_reassembler_phases() {
        let mut r = StreamReassembler::new();
        assert_eq!(r.phase(), StreamPhase::Idle);
        r.push(b"data: a\n");
        assert_eq!(r.phase(), StreamPhase::Streaming);
        r.finish();
        assert_eq!(r.phase(), StreamPhase::Done);
        assert!(r.push(b"data: late\n").is_empty());
        assert_eq!(r.value(), "a");

        let mut r = StreamReassembler::new();
        r.push(b"data: a\ndata: b");
        r.fail();
        assert_eq!(r.phase(), StreamPhase::Failed);
        assert!(r.finish().is_none());
        assert_eq!(r.value(), "a");
    }

    #[test]
    fn test_data_fragment() {
        assert_eq!(data_fragment("data: hi"), Some("hi"));
        assert_eq!(data_fragment("data:hi"), None);
        assert_eq!(data_fragment(" data: hi"), None);
        assert_eq!(data_fragment("data: data: x"), Some("data: x"));
    }

    #[test]
    fn test_pacing_from_millis() {
        assert_eq!(Pacing::from_millis(None), Pacing::Off);
        assert_eq!(Pacing::from_millis(Some(0)), Pacing::Off);
        assert_eq!(
            Pacing::from_millis(Some(15)),
            Pacing::Typewriter(Duration::from_millis(15))
        );
    }
}
