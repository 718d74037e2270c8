//! Accumulation of streamed response text with reasoning segments filtered out.

/// Marker opening a hidden reasoning segment
pub const THINK_OPEN: &str = "<think>";
/// Marker closing a hidden reasoning segment
pub const THINK_CLOSE: &str = "</think>";

/// What the filter decided for a single delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaVerdict {
    /// Delta is visible output
    Accepted,
    /// Delta opened a reasoning segment
    OpenedReasoning,
    /// Delta closed a reasoning segment
    ClosedReasoning,
    /// Delta arrived inside a reasoning segment
    Hidden,
}

impl DeltaVerdict {
    pub fn is_accepted(self) -> bool {
        self == DeltaVerdict::Accepted
    }
}

/// Tracks whether the stream is currently inside a reasoning segment.
///
/// Markers are matched per delta, not across delta boundaries. A delta that
/// carries the close marker is dropped whole, including any text after the
/// marker.
#[derive(Debug, Clone, Default)]
pub struct ReasoningFilter {
    reasoning: bool,
}

impl ReasoningFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, delta: &str) -> DeltaVerdict {
        if delta.contains(THINK_OPEN) {
            self.reasoning = true;
            DeltaVerdict::OpenedReasoning
        } else if delta.contains(THINK_CLOSE) {
            self.reasoning = false;
            DeltaVerdict::ClosedReasoning
        } else if self.reasoning {
            DeltaVerdict::Hidden
        } else {
            DeltaVerdict::Accepted
        }
    }
}

/// State for one streamed response
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    /// Accumulated visible text
    text_buffer: String,
    filter: ReasoningFilter,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta; visible deltas are appended to the buffer
    pub fn push_delta(&mut self, delta: &str) -> DeltaVerdict {
        let verdict = self.filter.classify(delta);
        if verdict.is_accepted() {
            self.text_buffer.push_str(delta);
        }
        verdict
    }

    pub fn text(&self) -> &str {
        &self.text_buffer
    }

    pub fn into_text(self) -> String {
        self.text_buffer
    }
}
