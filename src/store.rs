use crate::events::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Number of recent messages kept per session
pub const HISTORY_CAP: usize = 10;

/// Bounded conversation history plus the active model selection
#[derive(Debug, Clone)]
pub struct ConversationStore {
    messages: VecDeque<Message>,
    max_messages: usize,
    model: String,
}

impl ConversationStore {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_capacity(model, HISTORY_CAP)
    }

    /// A capacity of zero is raised to one
    pub fn with_capacity(model: impl Into<String>, max_messages: usize) -> Self {
        let max_messages = max_messages.max(1);
        Self {
            messages: VecDeque::with_capacity(max_messages),
            max_messages,
            model: model.into(),
        }
    }

    /// Add a message, evicting the oldest one when the history is full
    pub fn append(&mut self, message: Message) {
        if self.messages.len() >= self.max_messages {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Ordered snapshot of the history
    pub fn history(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Cloneable handle to a store shared between the session and the relay
#[derive(Debug, Clone)]
pub struct SharedStore(Arc<Mutex<ConversationStore>>);

impl SharedStore {
    pub fn new(store: ConversationStore) -> Self {
        Self(Arc::new(Mutex::new(store)))
    }

    pub fn append(&self, message: Message) {
        self.0.lock().append(message);
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    pub fn history(&self) -> Vec<Message> {
        self.0.lock().history()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        self.0.lock().set_model(model);
    }

    pub fn model(&self) -> String {
        self.0.lock().model().to_string()
    }
}
