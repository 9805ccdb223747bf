use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use crate::app::{App, BackendStatus, FocusPane, InputMode};
use crate::state::ChatRole;

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            // Consume the second *
            chars.next();

            // Push any accumulated plain text
            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal (a reply may still be streaming in)
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    // The upload panel disappears for good once the resume is indexed
    let upload_height = if app.chat.upload().uploaded() { 0 } else { 4 };
    let [upload_area, chat_area, input_area] = Layout::vertical([
        Constraint::Length(upload_height),
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(body_area);

    if upload_height > 0 {
        render_upload(app, frame, upload_area);
    }
    render_transcript(app, frame, chat_area);
    render_chat_input(app, frame, input_area);

    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let (status_text, status_color) = match app.backend_status {
        BackendStatus::Unknown => ("checking", Color::Gray),
        BackendStatus::Online => ("online", Color::Green),
        BackendStatus::Offline => ("offline", Color::Red),
    };

    let title = Line::from(vec![
        Span::styled(" Resume Chat Assistant ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.client.base_url().to_string(), Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(format!("[{}]", status_text), Style::default().fg(status_color)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

/// Horizontally scrolled single-line input with the cursor kept in view.
fn render_line_input(
    frame: &mut Frame,
    area: Rect,
    block: Block<'_>,
    text: &str,
    cursor: usize,
    text_style: Style,
    show_cursor: bool,
) {
    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;

    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor >= inner_width {
        cursor - inner_width + 1
    } else {
        0
    };

    let visible_text: String = text.chars().skip(scroll_offset).take(inner_width).collect();

    let input = Paragraph::new(visible_text).style(text_style).block(block);
    frame.render_widget(input, area);

    if show_cursor {
        let cursor_x = (cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_upload(app: &App, frame: &mut Frame, area: Rect) {
    let [path_area, status_area] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    let upload = app.chat.upload();
    let focused = app.focus == FocusPane::FileInput;
    let editing = focused && app.input_mode == InputMode::Editing && !upload.uploading();
    let border_color = if focused { Color::Yellow } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Resume PDF (drop a file or type its path, Enter to upload) ");

    if app.file_input.is_empty() && !editing {
        let placeholder = Paragraph::new(Span::styled(
            "Drag and drop your PDF resume here",
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        frame.render_widget(placeholder, path_area);
    } else {
        render_line_input(
            frame,
            path_area,
            block,
            &app.file_input,
            app.file_cursor,
            Style::default().fg(Color::Cyan),
            editing,
        );
    }

    let status = if upload.uploading() {
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        Line::from(Span::styled(
            format!(" Uploading{}", dots),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
        ))
    } else if let Some(file) = upload.file() {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        Line::from(vec![
            Span::styled(" Selected: ", Style::default().fg(Color::DarkGray)),
            Span::styled(name, Style::default().fg(Color::Green)),
            Span::styled("  (Enter: Upload Resume)", Style::default().fg(Color::DarkGray)),
        ])
    } else {
        Line::from(Span::styled(
            " No file selected",
            Style::default().fg(Color::DarkGray),
        ))
    };
    frame.render_widget(Paragraph::new(status), status_area);
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store area for mouse hit-testing and inner size for scroll calculations
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);
    if app.follow_tail {
        app.scroll_chat_to_bottom();
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");

    let text = if app.chat.messages().is_empty() {
        Text::from(Span::styled(
            "Upload your resume to start chatting about it.",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for (index, msg) in app.chat.messages().iter().enumerate() {
            match msg.role {
                ChatRole::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )));
                    for line in msg.content.lines() {
                        lines.push(Line::from(line.to_string()));
                    }
                }
                ChatRole::Assistant => {
                    lines.push(Line::from(Span::styled(
                        "Assistant:",
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    )));
                    if app.chat.awaiting_reply(index) {
                        // Animated ellipsis: cycles through ".", "..", "..."
                        let dots = ".".repeat((app.animation_frame as usize) + 1);
                        lines.push(Line::from(Span::styled(
                            format!("Thinking{}", dots),
                            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                        )));
                    }
                    for line in msg.content.lines() {
                        lines.push(parse_markdown_line(line));
                    }
                }
            }
            lines.push(Line::default());
        }

        Text::from(lines)
    };

    let transcript = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(transcript, area);
}

fn render_chat_input(app: &App, frame: &mut Frame, area: Rect) {
    let enabled = app.chat.input_enabled();
    let focused = app.focus == FocusPane::ChatInput;
    let editing = enabled && focused && app.input_mode == InputMode::Editing;

    let border_color = if !enabled {
        Color::DarkGray
    } else if focused {
        Color::Yellow
    } else {
        Color::Gray
    };

    let title = if app.chat.is_streaming() {
        " Ask (waiting for reply) "
    } else {
        " Ask (Enter to send) "
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    if app.chat_input.is_empty() && !editing {
        let placeholder = Paragraph::new(Span::styled(
            "Ask your resume anything...",
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let text_style = if enabled {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    render_line_input(frame, area, block, &app.chat_input, app.chat_cursor, text_style, editing);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match (app.input_mode, app.focus) {
        (InputMode::Normal, _) => " NORMAL ",
        (InputMode::Editing, FocusPane::FileInput) => " UPLOAD ",
        (InputMode::Editing, FocusPane::ChatInput) => " CHAT ",
    };

    let hints = match app.input_mode {
        InputMode::Normal => " i:type  Tab:switch  j/k:scroll  g/G:top/bottom  q:quit",
        InputMode::Editing => " Enter:submit  Tab:switch  PgUp/PgDn:scroll  Esc:normal  Ctrl+C:quit",
    };

    let mut spans = vec![Span::styled(mode_text, mode_style)];
    if let Some(notice) = &app.notice {
        spans.push(Span::styled(
            format!(" {}", notice),
            Style::default().fg(Color::Red),
        ));
    } else {
        spans.push(Span::styled(hints, Style::default().fg(Color::DarkGray)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
