use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use crate::app::{App, FocusPane, InputMode};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Paste(text) => handle_paste(app, &text),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
        }
        AppEvent::Backend(event) => app.apply_backend(event),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn half_page(app: &App) -> u16 {
    (app.chat_height / 2).max(1)
}

fn toggle_focus(app: &mut App) {
    app.focus = match app.focus {
        FocusPane::FileInput => FocusPane::ChatInput,
        // The upload box is gone once the resume is in
        FocusPane::ChatInput if !app.chat.upload().uploaded() => FocusPane::FileInput,
        FocusPane::ChatInput => FocusPane::ChatInput,
    };
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        // Quit
        KeyCode::Char('q') => app.should_quit = true,

        // Back to typing
        KeyCode::Char('i') | KeyCode::Enter => app.input_mode = InputMode::Editing,

        KeyCode::Tab => toggle_focus(app),

        // Transcript scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_chat_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_chat_up(1),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_chat_down(half_page(app));
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_chat_up(half_page(app));
        }
        KeyCode::PageDown => app.scroll_chat_down(half_page(app)),
        KeyCode::PageUp => app.scroll_chat_up(half_page(app)),
        KeyCode::Char('g') => app.scroll_chat_up(u16::MAX),
        KeyCode::Char('G') | KeyCode::End => app.scroll_chat_to_bottom(),

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
            return;
        }
        KeyCode::Tab => {
            toggle_focus(app);
            return;
        }
        KeyCode::PageDown => {
            app.scroll_chat_down(half_page(app));
            return;
        }
        KeyCode::PageUp => {
            app.scroll_chat_up(half_page(app));
            return;
        }
        _ => {}
    }

    match app.focus {
        FocusPane::FileInput => handle_file_editing(app, key),
        FocusPane::ChatInput => handle_chat_editing(app, key),
    }
}

fn handle_file_editing(app: &mut App, key: KeyEvent) {
    // Path stays put while its upload runs or after it succeeded
    if app.chat.upload().uploading() || app.chat.upload().uploaded() {
        return;
    }

    if key.code == KeyCode::Enter {
        app.start_upload();
        return;
    }

    edit_line(&mut app.file_input, &mut app.file_cursor, key.code);
}

fn handle_chat_editing(app: &mut App, key: KeyEvent) {
    // Input is disabled until the resume is uploaded and while a reply streams
    if !app.chat.input_enabled() {
        return;
    }

    if key.code == KeyCode::Enter {
        app.submit_chat();
        return;
    }

    edit_line(&mut app.chat_input, &mut app.chat_cursor, key.code);
}

/// Single-line editing with a character cursor.
fn edit_line(text: &mut String, cursor: &mut usize, code: KeyCode) {
    match code {
        KeyCode::Backspace => {
            if *cursor > 0 {
                *cursor -= 1;
                let byte_pos = char_to_byte_index(text, *cursor);
                text.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = text.chars().count();
            if *cursor < char_count {
                let byte_pos = char_to_byte_index(text, *cursor);
                text.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            *cursor = cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = text.chars().count();
            *cursor = (*cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            *cursor = 0;
        }
        KeyCode::End => {
            *cursor = text.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(text, *cursor);
            text.insert(byte_pos, c);
            *cursor += 1;
        }
        _ => {}
    }
}

/// A drop onto the terminal arrives as a paste of the file's path.
fn handle_paste(app: &mut App, text: &str) {
    if !app.chat.upload().uploaded() {
        if app.chat.upload().uploading() {
            return;
        }
        app.set_file_input(text);
        app.choose_file();
        app.focus = FocusPane::FileInput;
        app.input_mode = InputMode::Editing;
    } else if app.chat.input_enabled() {
        // Keep pasted questions on one line
        for c in text.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }) {
            edit_line(&mut app.chat_input, &mut app.chat_cursor, KeyCode::Char(c));
        }
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_chat_down(3),
        MouseEventKind::ScrollUp => app.scroll_chat_up(3),
        _ => {}
    }
}
