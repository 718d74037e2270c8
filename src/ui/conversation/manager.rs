use crate::config::ConfigSource;
use crate::events::{ModelDescriptor, PanelCommand, PanelEvent};
use crate::relay::SubmissionOutcome;
use crate::session::PanelSession;
use crate::ui::conversation::commands::{get_help_text, ParsedCommand, SlashCommand};
use crate::ui::conversation::composer::{ComposerResult, ConversationComposer};
use crate::ui::conversation::history::ConversationHistory;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

const BUSY_STATUS: &str = "Wait for the current response to finish";

/// Actions that can be requested by the conversation manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationAction {
    None,
    Exit,
}

/// Drives the panel: turns keys into session commands and session events into transcript updates
pub struct ConversationManager {
    session: Arc<PanelSession>,
    history: ConversationHistory,
    composer: ConversationComposer,
    models: Vec<ModelDescriptor>,
    config_source: ConfigSource,
    status: Option<String>,
    finished_tx: mpsc::UnboundedSender<SubmissionOutcome>,
    finished_rx: mpsc::UnboundedReceiver<SubmissionOutcome>,
    is_streaming: bool,
}

impl ConversationManager {
    pub fn new(session: Arc<PanelSession>, config_source: ConfigSource) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let models = session.models();

        Self {
            session,
            history: ConversationHistory::new(200),
            composer: ConversationComposer::new("Ask me anything ..."),
            models,
            config_source,
            status: None,
            finished_tx,
            finished_rx,
            is_streaming: false,
        }
    }

    /// Handle key input
    pub async fn handle_key(&mut self, key: KeyEvent) -> ConversationAction {
        if key.kind != KeyEventKind::Press {
            return ConversationAction::None;
        }

        let ctrl_c = key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
        if ctrl_c {
            return ConversationAction::Exit;
        }
        if key.code == KeyCode::Esc {
            if self.composer.close_palette_if_open() {
                return ConversationAction::None;
            }
            return ConversationAction::Exit;
        }

        match self.composer.handle_key(key) {
            ComposerResult::Submitted(input) => {
                self.submit(input);
                ConversationAction::None
            }
            ComposerResult::Command(command) => self.handle_slash_command(command).await,
            ComposerResult::None => ConversationAction::None,
        }
    }

    /// Start a submission on a background task so the panel keeps drawing
    fn submit(&mut self, input: String) {
        if self.is_streaming {
            self.status = Some(BUSY_STATUS.to_string());
            return;
        }

        self.status = None;
        self.is_streaming = true;
        self.history.add_user_message(input.clone());
        self.history.set_streaming_message(String::new());

        let session = self.session.clone();
        let finished_tx = self.finished_tx.clone();
        tokio::spawn(async move {
            if let Some(outcome) = session
                .handle_command(PanelCommand::Send { text: input })
                .await
            {
                let _ = finished_tx.send(outcome);
            }
        });
    }

    /// Apply an event posted by the session
    pub fn apply_event(&mut self, event: PanelEvent) {
        match event {
            PanelEvent::ChatResponse { text } => self.history.set_streaming_message(text),
            PanelEvent::Models { text } => self.models = text,
            PanelEvent::UserMessage { text } => self.history.add_user_message(text),
            PanelEvent::AssistantMessage { text } => self.history.add_assistant_message(text),
        }
    }

    /// Drain finished submissions; call after applying pending session events
    pub fn take_finished(&mut self) -> Vec<SubmissionOutcome> {
        let mut finished = Vec::new();
        while let Ok(outcome) = self.finished_rx.try_recv() {
            finished.push(outcome);
        }
        finished
    }

    pub fn finish_submission(&mut self, outcome: SubmissionOutcome) {
        self.is_streaming = false;
        self.history.finish_streaming_message();
        if let SubmissionOutcome::Failed { error } = outcome {
            self.status = Some(format!("Request failed: {}", error));
        }
    }

    async fn handle_slash_command(&mut self, command: ParsedCommand) -> ConversationAction {
        match command.command {
            SlashCommand::Model => {
                let target = match command.argument() {
                    Some(model) => model.to_string(),
                    None => self.next_model(),
                };
                self.session
                    .handle_command(PanelCommand::Model {
                        text: target.clone(),
                    })
                    .await;
                self.status = Some(format!("Model set to {}", target));
            }
            SlashCommand::Clear => {
                if self.is_streaming {
                    self.status = Some(BUSY_STATUS.to_string());
                    return ConversationAction::None;
                }
                self.session.handle_command(PanelCommand::Clear).await;
                self.history.clear();
                self.status = Some("Conversation cleared".to_string());
            }
            SlashCommand::Reload => self.reload_config(),
            SlashCommand::Help => self.history.add_system_message(get_help_text()),
            SlashCommand::Bye => return ConversationAction::Exit,
        }
        ConversationAction::None
    }

    /// Next configured model after the active one, wrapping around
    fn next_model(&self) -> String {
        let current = self.session.store().model();
        let position = self.models.iter().position(|model| model.value == current);
        let next = match position {
            Some(index) => (index + 1) % self.models.len(),
            None => 0,
        };
        self.models
            .get(next)
            .map(|model| model.value.clone())
            .unwrap_or(current)
    }

    fn reload_config(&mut self) {
        match self.config_source.load() {
            Ok(config) => {
                info!(path = %self.config_source.path.display(), "configuration reloaded");
                self.session.apply_config(config);
                self.status = Some("Configuration reloaded".to_string());
            }
            Err(e) => {
                warn!(error = %e, "keeping previous configuration");
                self.status = Some(format!("Reload failed: {:#}", e));
            }
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Render the whole panel
    pub fn render(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),    // Transcript
                Constraint::Length(5), // Composer
                Constraint::Length(1), // Status line
            ])
            .split(frame.size());

        frame.render_widget(&self.history, chunks[0]);
        frame.render_widget(&self.composer, chunks[1]);
        frame.render_widget(Paragraph::new(self.status_line()), chunks[2]);
    }

    fn status_line(&self) -> Line<'static> {
        let config = self.session.config();
        let model = self.session.store().model();
        let display_name = self
            .models
            .iter()
            .find(|descriptor| descriptor.value == model)
            .map(|descriptor| descriptor.name.clone())
            .unwrap_or_else(|| model.clone());

        let mut spans = vec![
            Span::styled(format!(" {} ", display_name), Style::default().fg(Color::Black).bg(Color::Cyan)),
            Span::styled(format!(" {} ", config.server_url), Style::default().fg(Color::DarkGray)),
        ];
        if self.is_streaming {
            spans.push(Span::styled(" streaming ", Style::default().fg(Color::Yellow)));
        }
        if let Some(status) = &self.status {
            spans.push(Span::styled(format!(" {}", status), Style::default().fg(Color::Gray)));
        }
        Line::from(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Overrides};
    use crate::events::{Message, Role};
    use crate::prompts::THINKING_PLACEHOLDER;
    use crate::relay::testing::{Script, ScriptedBackend};
    use std::path::PathBuf;
    use tokio::sync::Notify;
    use pretty_assertions::assert_eq;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    async fn type_line(manager: &mut ConversationManager, text: &str) -> ConversationAction {
        for c in text.chars() {
            manager.handle_key(key(KeyCode::Char(c))).await;
        }
        manager.handle_key(key(KeyCode::Enter)).await
    }

    fn manager(
        scripts: Vec<Script>,
    ) -> (ConversationManager, mpsc::UnboundedReceiver<PanelEvent>) {
        let (session, events) = PanelSession::new(Config::default(), ScriptedBackend::new(scripts));
        let manager = ConversationManager::new(
            Arc::new(session),
            ConfigSource::new(PathBuf::from("/nonexistent/config.toml")),
        );
        (manager, events)
    }

    #[tokio::test]
    async fn submitted_prompt_streams_into_transcript() {
        let (mut manager, mut events) =
            manager(vec![Script::Events(ScriptedBackend::deltas(&["Hi", " there"]))]);

        type_line(&mut manager, "hello").await;
        assert!(manager.is_streaming());

        let outcome = loop {
            while let Ok(event) = events.try_recv() {
                manager.apply_event(event);
            }
            if let Some(outcome) = manager.take_finished().pop() {
                break outcome;
            }
            tokio::task::yield_now().await;
        };
        while let Ok(event) = events.try_recv() {
            manager.apply_event(event);
        }
        manager.finish_submission(outcome);

        let transcript: Vec<(Role, String)> = manager
            .history()
            .entries()
            .map(|entry| (entry.role, entry.content.clone()))
            .collect();
        assert_eq!(
            transcript,
            vec![
                (Role::User, "hello".to_string()),
                (Role::Assistant, "Hi there".to_string()),
            ]
        );
        assert!(!manager.is_streaming());
    }

    #[tokio::test]
    async fn model_command_without_argument_cycles() {
        let (mut manager, _events) = manager(vec![]);

        type_line(&mut manager, "/model").await;

        assert_eq!(manager.session.store().model(), "deepseek-r1:7b");
    }

    #[tokio::test]
    async fn model_command_with_argument_selects_it() {
        let (mut manager, _events) = manager(vec![]);

        type_line(&mut manager, "/model llama3.2").await;

        assert_eq!(manager.session.store().model(), "llama3.2");
        assert_eq!(manager.status(), Some("Model set to llama3.2"));
    }

    #[tokio::test]
    async fn bye_and_ctrl_c_exit() {
        let (mut manager, _events) = manager(vec![]);
        assert_eq!(type_line(&mut manager, "/bye").await, ConversationAction::Exit);

        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(manager.handle_key(ctrl_c).await, ConversationAction::Exit);
    }

    #[tokio::test]
    async fn reload_failure_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "models = 42").unwrap();

        let (session, _events) = PanelSession::new(Config::default(), ScriptedBackend::new(vec![]));
        let before = session.config();
        let mut manager = ConversationManager::new(Arc::new(session), ConfigSource::new(path));

        type_line(&mut manager, "/reload").await;

        assert_eq!(manager.session.config(), before);
        assert!(manager.status().unwrap().starts_with("Reload failed"));
    }

    #[tokio::test]
    async fn reload_keeps_command_line_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "system_prompt = \"Be brief.\"\n").unwrap();

        let (session, _events) = PanelSession::new(Config::default(), ScriptedBackend::new(vec![]));
        let source = ConfigSource::new(&path).with_overrides(Overrides {
            server_url: Some("http://pinned:11434".to_string()),
            show_thinking: true,
        });
        let mut manager = ConversationManager::new(Arc::new(session), source);

        type_line(&mut manager, "/reload").await;

        let config = manager.session.config();
        assert_eq!(config.system_prompt, "Be brief.");
        assert_eq!(config.server_url, "http://pinned:11434");
        assert_eq!(config.thinking_placeholder.as_deref(), Some(THINKING_PLACEHOLDER));
    }

    #[tokio::test]
    async fn clear_is_refused_while_a_response_streams() {
        let gate = Arc::new(Notify::new());
        let (mut manager, _events) = manager(vec![Script::Gated(
            gate.clone(),
            ScriptedBackend::deltas(&["late"]),
        )]);

        type_line(&mut manager, "hello").await;
        while manager.session.store().is_empty() {
            tokio::task::yield_now().await;
        }
        type_line(&mut manager, "/clear").await;

        assert_eq!(manager.status(), Some(BUSY_STATUS));
        assert_eq!(manager.session.store().history(), vec![Message::user("hello")]);
        assert_eq!(manager.history().entries().count(), 1);
    }
}
