//! Transcript display component

use crate::events::Role;
use chrono::{DateTime, Local};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};
use std::collections::VecDeque;

/// A single entry shown in the transcript
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

/// Transcript of the conversation as the panel shows it
#[derive(Clone)]
pub struct ConversationHistory {
    entries: VecDeque<TranscriptEntry>,
    max_entries: usize,
    /// Response currently being streamed, replaced on every update
    streaming_message: Option<String>,
}

impl ConversationHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries,
            streaming_message: None,
        }
    }

    fn push(&mut self, role: Role, content: String) {
        self.entries.push_back(TranscriptEntry {
            role,
            content,
            timestamp: Local::now(),
        });
        if self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    pub fn add_user_message(&mut self, content: String) {
        self.push(Role::User, content);
    }

    pub fn add_assistant_message(&mut self, content: String) {
        self.push(Role::Assistant, content);
    }

    /// Panel-local notices such as help text; never sent to the model
    pub fn add_system_message(&mut self, content: String) {
        self.push(Role::System, content);
    }

    pub fn set_streaming_message(&mut self, message: String) {
        self.streaming_message = Some(message);
    }

    /// Move the streamed response into the transcript
    pub fn finish_streaming_message(&mut self) {
        if let Some(message) = self.streaming_message.take() {
            self.add_assistant_message(message);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.streaming_message = None;
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }
}

impl Widget for &ConversationHistory {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default().borders(Borders::ALL).title("Chat");

        let inner_area = block.inner(area);
        block.render(area, buf);

        if self.entries.is_empty() && self.streaming_message.is_none() {
            let welcome_lines = vec![
                Line::from(vec![Span::styled(
                    "Ask the local model anything.",
                    Style::default().fg(Color::Green),
                )]),
                Line::from(vec![Span::raw("")]),
                Line::from(vec![Span::styled(
                    "Enter to send, Shift+Enter for a new line, /help for commands.",
                    Style::default().fg(Color::DarkGray),
                )]),
            ];

            for (i, line) in welcome_lines.iter().enumerate() {
                if i < inner_area.height as usize {
                    buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
                }
            }
            return;
        }

        let width = inner_area.width.saturating_sub(2) as usize;
        let mut all_lines: Vec<Line> = Vec::new();
        for entry in &self.entries {
            all_lines.extend(render_entry(entry, width));
            all_lines.push(Line::from(vec![Span::raw("")]));
        }
        if let Some(streaming_text) = &self.streaming_message {
            all_lines.extend(render_streaming_message(streaming_text, width));
        }

        // Show the bottom of the transcript
        let height = inner_area.height as usize;
        let start = all_lines.len().saturating_sub(height);
        for (i, line) in all_lines[start..].iter().enumerate() {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Assistant => "Model",
        Role::System => "Panel",
    }
}

fn content_style(role: Role) -> Style {
    match role {
        Role::User => Style::default().fg(Color::Blue),
        Role::Assistant => Style::default().fg(Color::Green),
        Role::System => Style::default().fg(Color::Yellow),
    }
}

fn render_entry(entry: &TranscriptEntry, width: usize) -> Vec<Line<'static>> {
    let header = format!(
        "{} {} {}",
        role_label(entry.role),
        entry.timestamp.format("%H:%M:%S"),
        "─".repeat(20)
    );
    let mut lines = vec![Line::from(vec![Span::styled(
        header,
        Style::default().fg(Color::DarkGray),
    )])];

    for content_line in wrap_text(&entry.content, width) {
        lines.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(content_line, content_style(entry.role)),
        ]));
    }
    lines
}

fn render_streaming_message(text: &str, width: usize) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(vec![Span::styled(
        format!("{} {}", role_label(Role::Assistant), "─".repeat(20)),
        Style::default().fg(Color::DarkGray),
    )])];

    let content_lines = wrap_text(text, width);
    let last = content_lines.len().saturating_sub(1);
    for (i, content_line) in content_lines.into_iter().enumerate() {
        let cursor = if i == last { "▋" } else { "" };
        lines.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(content_line, Style::default().fg(Color::Green)),
            Span::styled(cursor, Style::default().fg(Color::Yellow)),
        ]));
    }
    lines
}

/// Wrap text to `width` columns, keeping existing line breaks
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    for source_line in text.split('\n') {
        let mut current_line = String::new();
        let mut current_width = 0;
        let mut started = false;

        for word in source_line.split(' ') {
            let word_width = word.chars().count();
            let needed = if started {
                current_width + 1 + word_width
            } else {
                word_width
            };

            if needed <= width {
                if started {
                    current_line.push(' ');
                }
                current_line.push_str(word);
                current_width = needed;
                started = true;
            } else {
                if started {
                    lines.push(std::mem::take(&mut current_line));
                }
                started = true;
                // Hard-split words longer than the line
                let chars: Vec<char> = word.chars().collect();
                let mut chunks = chars.chunks(width).peekable();
                current_width = 0;
                while let Some(chunk) = chunks.next() {
                    let piece: String = chunk.iter().collect();
                    if chunks.peek().is_some() {
                        lines.push(piece);
                    } else {
                        current_width = chunk.len();
                        current_line = piece;
                    }
                }
            }
        }

        lines.push(current_line);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wrap_keeps_line_breaks_and_width() {
        assert_eq!(
            wrap_text("fn main() {\n    body\n}", 40),
            vec!["fn main() {", "    body", "}"]
        );
        assert_eq!(wrap_text("aaa bbb ccc", 7), vec!["aaa bbb", "ccc"]);
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn streaming_message_moves_into_transcript() {
        let mut history = ConversationHistory::new(50);
        history.add_user_message("q".into());
        history.set_streaming_message("par".into());
        history.set_streaming_message("partial answer".into());
        assert_eq!(history.entries().count(), 1);

        history.finish_streaming_message();
        history.finish_streaming_message();

        assert_eq!(history.entries().count(), 2);
        let last = history.entries().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "partial answer");
    }

    #[test]
    fn transcript_is_bounded() {
        let mut history = ConversationHistory::new(2);
        for n in 0..3 {
            history.add_user_message(n.to_string());
        }
        let contents: Vec<&str> = history.entries().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["1", "2"]);
    }
}
