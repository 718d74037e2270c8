use crate::config::Config;
use crate::events::{ModelDescriptor, PanelCommand, PanelEvent, Role};
use crate::llm::ChatBackend;
use crate::relay::{RelaySettings, StreamingRelay, SubmissionOutcome};
use crate::store::{ConversationStore, SharedStore};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Glue between a panel and the relay for one workspace session
pub struct PanelSession {
    config: RwLock<Config>,
    relay: StreamingRelay,
    display: mpsc::UnboundedSender<PanelEvent>,
}

impl PanelSession {
    /// Create a session; the receiver carries every event meant for the panel
    pub fn new(
        config: Config,
        backend: Arc<dyn ChatBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<PanelEvent>) {
        let (display, events) = mpsc::unbounded_channel();
        let store = SharedStore::new(ConversationStore::new(config.default_model()));
        let relay = StreamingRelay::new(
            backend,
            store,
            RelaySettings::from(&config),
            display.clone(),
        );

        let session = Self {
            config: RwLock::new(config),
            relay,
            display,
        };
        (session, events)
    }

    pub fn store(&self) -> &SharedStore {
        self.relay.store()
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn models(&self) -> Vec<ModelDescriptor> {
        self.config.read().models.clone()
    }

    /// Dispatch one command from the panel
    pub async fn handle_command(&self, command: PanelCommand) -> Option<SubmissionOutcome> {
        match command {
            PanelCommand::Send { text } => {
                if text.trim().is_empty() {
                    warn!("ignoring empty prompt");
                    return None;
                }
                Some(self.relay.submit_prompt(&text).await)
            }
            PanelCommand::Clear => {
                info!("clearing conversation history");
                self.relay.clear_history().await;
                None
            }
            PanelCommand::Model { text } => {
                info!(model = %text, "switching model");
                self.store().set_model(text);
                None
            }
        }
    }

    /// Post the model list and replay stored history to a freshly shown view
    pub fn resolve_view(&self) {
        self.post_models();
        for message in self.store().history() {
            let event = match message.role {
                Role::User => PanelEvent::UserMessage {
                    text: message.content,
                },
                Role::Assistant => PanelEvent::AssistantMessage {
                    text: message.content,
                },
                Role::System => continue,
            };
            self.post(event);
        }
    }

    /// Apply a refreshed configuration
    pub fn apply_config(&self, config: Config) {
        self.relay.update_settings(RelaySettings::from(&config));

        let current = self.store().model();
        if !config.has_model(&current) {
            let fallback = config.default_model().to_string();
            info!(from = %current, to = %fallback, "selected model no longer configured");
            self.store().set_model(fallback);
        }

        *self.config.write() = config;
        self.post_models();
    }

    fn post_models(&self) {
        let models = self.models();
        self.post(PanelEvent::Models { text: models });
    }

    fn post(&self, event: PanelEvent) {
        let _ = self.display.send(event);
    }
}
