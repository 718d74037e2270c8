use crate::config::Config;
use crate::events::{Message, PanelEvent};
use crate::llm::{ChatBackend, ChatRequest, LlmError, LlmEvent};
use crate::store::SharedStore;
use crate::streaming::{DeltaVerdict, StreamState};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};

/// Values the relay reads from configuration on every submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub server_url: String,
    pub system_prompt: String,
    pub thinking_placeholder: Option<String>,
}

impl From<&Config> for RelaySettings {
    fn from(config: &Config) -> Self {
        Self {
            server_url: config.server_url.clone(),
            system_prompt: config.system_prompt.clone(),
            thinking_placeholder: config.thinking_placeholder.clone(),
        }
    }
}

/// Lifecycle of a single submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    AwaitingFirstDelta,
    Reasoning,
    Streaming,
    Completed,
    Failed,
}

/// Terminal result of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Stream finished; `text` was stored as the assistant message
    Completed { text: String },
    /// Stream failed; nothing was stored for the assistant
    Failed { error: String },
}

/// Relays prompts to the model server and streams visible output to the panel
pub struct StreamingRelay {
    backend: Arc<dyn ChatBackend>,
    store: SharedStore,
    settings: RwLock<RelaySettings>,
    display: mpsc::UnboundedSender<PanelEvent>,
    /// Held for the whole of a submission so submissions never interleave
    in_flight: Mutex<()>,
}

impl StreamingRelay {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: SharedStore,
        settings: RelaySettings,
        display: mpsc::UnboundedSender<PanelEvent>,
    ) -> Self {
        Self {
            backend,
            store,
            settings: RwLock::new(settings),
            display,
            in_flight: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn settings(&self) -> RelaySettings {
        self.settings.read().clone()
    }

    /// Replace endpoint, system prompt and placeholder; applies to the next submission
    pub fn update_settings(&self, settings: RelaySettings) {
        *self.settings.write() = settings;
    }

    /// Forget the conversation once any in-flight submission has finished
    pub async fn clear_history(&self) {
        let _guard = self.in_flight.lock().await;
        self.store.clear();
    }

    /// Send a prompt and stream the answer to the display.
    ///
    /// The caller is expected to reject empty prompts. A submission issued
    /// while another is in flight waits for the first one to finish.
    pub async fn submit_prompt(&self, prompt: &str) -> SubmissionOutcome {
        let _guard = self.in_flight.lock().await;
        let mut state = SubmissionState::Idle;

        self.store.append(Message::user(prompt));

        let settings = self.settings();
        let model = self.store.model();
        let request = ChatRequest::streaming(
            model.clone(),
            vec![Message::system(settings.system_prompt.clone()), Message::user(prompt)],
        );
        info!(%model, server = %settings.server_url, "submitting prompt");

        Self::transition(&mut state, SubmissionState::AwaitingFirstDelta);
        let mut events = match self.backend.stream_chat(&settings.server_url, request).await {
            Ok(events) => events,
            Err(e) => return self.fail(&mut state, e.to_string()),
        };

        let mut stream = StreamState::new();
        loop {
            match events.recv().await {
                Some(LlmEvent::TextDelta(delta)) => match stream.push_delta(&delta) {
                    DeltaVerdict::Accepted => {
                        Self::transition(&mut state, SubmissionState::Streaming);
                        self.post(PanelEvent::ChatResponse {
                            text: stream.text().to_string(),
                        });
                    }
                    DeltaVerdict::OpenedReasoning | DeltaVerdict::Hidden => {
                        Self::transition(&mut state, SubmissionState::Reasoning);
                        if let Some(placeholder) = &settings.thinking_placeholder {
                            self.post(PanelEvent::ChatResponse {
                                text: placeholder.clone(),
                            });
                        }
                    }
                    DeltaVerdict::ClosedReasoning => {
                        Self::transition(&mut state, SubmissionState::Streaming);
                    }
                },
                Some(LlmEvent::StreamComplete) => break,
                Some(LlmEvent::Error(message)) => return self.fail(&mut state, message),
                None => return self.fail(&mut state, LlmError::Interrupted.to_string()),
            }
        }

        let text = stream.into_text();
        self.store.append(Message::assistant(text.clone()));
        Self::transition(&mut state, SubmissionState::Completed);
        info!(chars = text.len(), "response complete");

        SubmissionOutcome::Completed { text }
    }

    fn fail(&self, state: &mut SubmissionState, error: String) -> SubmissionOutcome {
        Self::transition(state, SubmissionState::Failed);
        error!(%error, "submission failed");
        self.post(PanelEvent::ChatResponse {
            text: format!("Error: {}", error),
        });
        SubmissionOutcome::Failed { error }
    }

    fn transition(state: &mut SubmissionState, next: SubmissionState) {
        if *state != next {
            debug!(from = ?*state, to = ?next, "submission state");
            *state = next;
        }
    }

    fn post(&self, event: PanelEvent) {
        if self.display.send(event).is_err() {
            debug!("display surface closed, dropping update");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::events::Role;
    use crate::store::ConversationStore;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn relay_with(
        backend: Arc<ScriptedBackend>,
        settings: RelaySettings,
    ) -> (Arc<StreamingRelay>, mpsc::UnboundedReceiver<PanelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = SharedStore::new(ConversationStore::new("deepseek-r1:1.5b"));
        (
            Arc::new(StreamingRelay::new(backend, store, settings, tx)),
            rx,
        )
    }

    #[tokio::test]
    async fn reasoning_is_never_displayed() {
        let backend = ScriptedBackend::new(vec![Script::Events(ScriptedBackend::deltas(&[
            "<think>", "secret", "</think>", "answer",
        ]))]);
        let (relay, mut rx) = relay_with(backend, settings());

        let outcome = relay.submit_prompt("why?").await;

        let updates = drain(&mut rx);
        assert!(updates.iter().all(|text| !text.contains("secret")));
        assert!(updates.iter().all(|text| !text.contains("think>")));
        assert_eq!(updates.last().map(String::as_str), Some("answer"));
        assert_eq!(
            outcome,
            SubmissionOutcome::Completed {
                text: "answer".into()
            }
        );
    }

    #[tokio::test]
    async fn display_text_only_grows() {
        let deltas = ["Rust ", "is ", "a ", "systems ", "language."];
        let backend = ScriptedBackend::new(vec![Script::Events(ScriptedBackend::deltas(&deltas))]);
        let (relay, mut rx) = relay_with(backend, settings());

        relay.submit_prompt("what is rust").await;

        let updates = drain(&mut rx);
        assert_eq!(updates.len(), deltas.len());
        for pair in updates.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
            assert!(pair[1].len() > pair[0].len());
        }
        assert_eq!(updates.last().unwrap(), "Rust is a systems language.");
    }

    #[tokio::test]
    async fn user_and_assistant_messages_are_stored() {
        let backend = ScriptedBackend::new(vec![Script::Events(ScriptedBackend::deltas(&["hi"]))]);
        let (relay, _rx) = relay_with(backend.clone(), settings());

        relay.submit_prompt("hello").await;

        assert_eq!(
            relay.store().history(),
            vec![Message::user("hello"), Message::assistant("hi")]
        );
    }

    #[tokio::test]
    async fn reasoning_only_stream_stores_empty_answer() {
        let backend = ScriptedBackend::new(vec![Script::Events(ScriptedBackend::deltas(&[
            "<think>", "pondering", "</think>",
        ]))]);
        let (relay, mut rx) = relay_with(backend, settings());

        let outcome = relay.submit_prompt("hmm").await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(outcome, SubmissionOutcome::Completed { text: String::new() });
        let history = relay.store().history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], Message::assistant(""));
    }

    #[tokio::test]
    async fn stream_error_posts_one_error_and_stores_no_answer() {
        let mut events = vec![
            LlmEvent::TextDelta("par".into()),
            LlmEvent::TextDelta("tial".into()),
        ];
        events.push(LlmEvent::Error("connection reset".into()));
        let backend = ScriptedBackend::new(vec![Script::Events(events)]);
        let (relay, mut rx) = relay_with(backend, settings());
        let before = relay.store().len();

        let outcome = relay.submit_prompt("go").await;

        let updates = drain(&mut rx);
        let errors: Vec<&String> = updates
            .iter()
            .filter(|text| text.starts_with("Error: "))
            .collect();
        assert_eq!(errors, vec!["Error: connection reset"]);
        assert_eq!(updates.last().unwrap(), "Error: connection reset");
        assert!(matches!(outcome, SubmissionOutcome::Failed { .. }));

        let history = relay.store().history();
        assert_eq!(history.len(), before + 1);
        assert!(history.iter().all(|message| message.role != Role::Assistant));
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let backend = ScriptedBackend::new(vec![Script::Refuse("connection refused".into())]);
        let (relay, mut rx) = relay_with(backend, settings());

        relay.submit_prompt("anyone there?").await;

        assert_eq!(drain(&mut rx), vec!["Error: connection refused".to_string()]);
        assert_eq!(relay.store().history(), vec![Message::user("anyone there?")]);
    }

    #[tokio::test]
    async fn relay_stays_usable_after_failure() {
        let backend = ScriptedBackend::new(vec![
            Script::Refuse("down".into()),
            Script::Events(ScriptedBackend::deltas(&["back"])),
        ]);
        let (relay, _rx) = relay_with(backend, settings());

        relay.submit_prompt("one").await;
        let outcome = relay.submit_prompt("two").await;

        assert_eq!(outcome, SubmissionOutcome::Completed { text: "back".into() });
    }

    #[tokio::test]
    async fn request_carries_system_prompt_latest_turn_and_selected_model() {
        let backend = ScriptedBackend::new(vec![
            Script::Events(ScriptedBackend::deltas(&["a"])),
            Script::Events(ScriptedBackend::deltas(&["b"])),
        ]);
        let (relay, _rx) = relay_with(backend.clone(), settings());

        relay.submit_prompt("first").await;
        relay.store().set_model("qwen2.5:7b");
        relay.submit_prompt("second").await;

        let requests = backend.requests.lock();
        assert_eq!(requests.len(), 2);
        let (url, request) = &requests[1];
        assert_eq!(url, "http://127.0.0.1:11434");
        assert_eq!(
            request,
            &ChatRequest::streaming(
                "qwen2.5:7b",
                vec![Message::system("You are terse."), Message::user("second")]
            )
        );
    }

    #[tokio::test]
    async fn placeholder_is_shown_while_reasoning_when_configured() {
        let backend = ScriptedBackend::new(vec![Script::Events(ScriptedBackend::deltas(&[
            "<think>", "x", "</think>", "done",
        ]))]);
        let mut with_placeholder = settings();
        with_placeholder.thinking_placeholder = Some("# thinking ...".into());
        let (relay, mut rx) = relay_with(backend, with_placeholder);

        relay.submit_prompt("q").await;

        assert_eq!(
            drain(&mut rx),
            vec!["# thinking ...", "# thinking ...", "done"]
        );
    }

    #[tokio::test]
    async fn updated_settings_apply_to_next_submission() {
        let backend = ScriptedBackend::new(vec![]);
        let (relay, _rx) = relay_with(backend.clone(), settings());

        relay.update_settings(RelaySettings {
            server_url: "http://gpu-box:11434".into(),
            system_prompt: "Be kind.".into(),
            thinking_placeholder: None,
        });
        relay.submit_prompt("hi").await;

        let requests = backend.requests.lock();
        assert_eq!(requests[0].0, "http://gpu-box:11434");
        assert_eq!(requests[0].1.messages[0], Message::system("Be kind."));
    }

    #[tokio::test]
    async fn overlapping_submissions_are_serialized() {
        let gate = Arc::new(Notify::new());
        let backend = ScriptedBackend::new(vec![
            Script::Gated(gate.clone(), ScriptedBackend::deltas(&["first answer"])),
            Script::Events(ScriptedBackend::deltas(&["second answer"])),
        ]);
        let (relay, _rx) = relay_with(backend, settings());

        let first = tokio::spawn({
            let relay = relay.clone();
            async move { relay.submit_prompt("first").await }
        });
        while relay.store().is_empty() {
            tokio::task::yield_now().await;
        }

        let second = tokio::spawn({
            let relay = relay.clone();
            async move { relay.submit_prompt("second").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(relay.store().len(), 1);

        gate.notify_one();
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(
            relay.store().history(),
            vec![
                Message::user("first"),
                Message::assistant("first answer"),
                Message::user("second"),
                Message::assistant("second answer"),
            ]
        );
    }

    #[tokio::test]
    async fn clear_waits_for_the_submission_in_flight() {
        let gate = Arc::new(Notify::new());
        let backend = ScriptedBackend::new(vec![Script::Gated(
            gate.clone(),
            ScriptedBackend::deltas(&["answer"]),
        )]);
        let (relay, _rx) = relay_with(backend.clone(), settings());

        let submission = tokio::spawn({
            let relay = relay.clone();
            async move { relay.submit_prompt("question").await }
        });
        while backend.requests.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        let clear = tokio::spawn({
            let relay = relay.clone();
            async move { relay.clear_history().await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!clear.is_finished());
        assert_eq!(relay.store().history(), vec![Message::user("question")]);

        gate.notify_one();
        submission.await.unwrap();
        clear.await.unwrap();

        assert!(relay.store().is_empty());
    }
}
