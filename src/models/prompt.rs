//! The augmented prompt handed to the generator.

use serde::Serialize;

use super::message::Role;

/// Where a segment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "role", rename_all = "snake_case")]
pub enum SegmentKind {
    /// System instructions; always first.
    Instructions,
    /// A prior conversation turn, passed through unchanged.
    History(Role),
    /// The final user turn with retrieval context appended.
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptSegment {
    pub kind: SegmentKind,
    pub text: String,
}

/// Ordered prompt segments. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AugmentedPrompt {
    segments: Vec<PromptSegment>,
}

impl AugmentedPrompt {
    pub(crate) fn from_segments(segments: Vec<PromptSegment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[PromptSegment] {
        &self.segments
    }

    /// The final segment, which carries the user's question.
    pub fn final_segment(&self) -> Option<&PromptSegment> {
        self.segments.last()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total characters across all segments.
    pub fn char_count(&self) -> usize {
        self.segments.iter().map(|s| s.text.chars().count()).sum()
    }
}
